// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::ffi::CString;
use std::io::Error;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Instant;

use clap::Parser;
use env_logger;
use image::GrayImage;
use libc::{c_void, close, mmap, munmap, shm_open, O_RDONLY, PROT_READ, MAP_FAILED, MAP_SHARED};
use log::{debug, info, warn};

use ::hit_detect::{extract_hits, new_accumulator, reset_accumulator,
                   ContourConfig, Frame, HitError, HitExtraction, Sample};
use crate::hit_detect::hit_detect_server::{HitDetect, HitDetectServer};
use crate::hit_detect::PixelType;

use tonic_web::GrpcWebLayer;

pub mod hit_detect {
    // The string specified here must match the proto package name.
    tonic::include_proto!("hit_detect");
}

fn errno() -> i32 {
    Error::last_os_error().raw_os_error().unwrap_or(0)
}

// Read-only mapping of a client-provided POSIX shared memory object. Unmapped
// and closed when dropped.
struct SharedMemory {
    fd: i32,
    addr: *mut c_void,
    len: usize,
}

impl SharedMemory {
    fn open(name: &str, len: usize) -> Result<SharedMemory, tonic::Status> {
        let c_name = CString::new(name).map_err(|_| tonic::Status::invalid_argument(
            format!("Invalid shared memory name {:?}", name)))?;
        debug!("Using shared memory at {:?}", c_name);
        unsafe {
            let fd = shm_open(c_name.as_ptr(), O_RDONLY, 0);
            if fd < 0 {
                let msg = format!("Could not open shared memory at {:?}: errno {}",
                                  c_name, errno());
                warn!("{}", msg);
                // Clever client-side logic can recognize the INTERNAL error and
                // fall back to not using shared memory.
                return Err(tonic::Status::internal(msg));
            }
            let addr = mmap(std::ptr::null_mut(), len, PROT_READ, MAP_SHARED, fd, 0);
            if addr == MAP_FAILED {
                let msg = format!(
                    "Could not mmap shared memory at {:?} for {} bytes: errno {}",
                    c_name, len, errno());
                warn!("{}", msg);
                if close(fd) == -1 {
                    warn!("Could not close shared memory file: errno {}", errno());
                }
                return Err(tonic::Status::internal(msg));
            }
            Ok(SharedMemory{fd, addr, len})
        }
    }

    fn as_slice(&self) -> &[u8] {
        // The mapping stays valid, and is only read, for the life of self.
        unsafe { std::slice::from_raw_parts(self.addr as *const u8, self.len) }
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        unsafe {
            if munmap(self.addr, self.len) == -1 {
                warn!("Could not munmap shared memory: errno {}", errno());
            }
            if close(self.fd) == -1 {
                warn!("Could not close shared memory file: errno {}", errno());
            }
        }
    }
}

fn status_from_hit_error(e: HitError) -> tonic::Status {
    match &e {
        HitError::InvalidFrameShape{..} =>
            tonic::Status::invalid_argument(e.to_string()),
        HitError::AccumulatorShapeMismatch{..} =>
            tonic::Status::failed_precondition(format!(
                "{}; reset the accumulator with discard=true to change size", e)),
    }
}

// Fields the client leaves unset keep their ContourConfig defaults.
fn contour_config(params: Option<hit_detect::ContourParams>) -> ContourConfig {
    let defaults = ContourConfig::default();
    let p = match params {
        Some(p) => p,
        None => return defaults,
    };
    ContourConfig{
        adaptive: p.adaptive.unwrap_or(defaults.adaptive),
        threshold_value: p.threshold_value.unwrap_or(defaults.threshold_value),
        adaptive_blocksize: p.adaptive_blocksize
            .unwrap_or(defaults.adaptive_blocksize),
        adaptive_shift: p.adaptive_shift.unwrap_or(defaults.adaptive_shift),
        contour_min_size: p.contour_min_size.unwrap_or(defaults.contour_min_size),
        contour_min_area: p.contour_min_area.unwrap_or(defaults.contour_min_area),
        contour_max_area: p.contour_max_area.unwrap_or(defaults.contour_max_area),
        roundness_pi: p.roundness_pi.unwrap_or(defaults.roundness_pi),
    }
}

fn gray_to_proto(image: &GrayImage) -> hit_detect::Image {
    hit_detect::Image{
        width: image.width() as i32,
        height: image.height() as i32,
        channels: 1,
        pixel_type: PixelType::U8 as i32,
        image_data: image.as_raw().clone(),
        shmem_name: None,
    }
}

struct MyHitDetect {
    // Composite shared by all accumulating requests. The lock is held while
    // hits are added and while snapshots are taken.
    accumulator: Mutex<Option<GrayImage>>,
}

impl MyHitDetect {
    fn lock_accumulator(&self)
                        -> Result<std::sync::MutexGuard<'_, Option<GrayImage>>,
                                  tonic::Status> {
        self.accumulator.lock().map_err(
            |_| tonic::Status::internal("Accumulator lock poisoned"))
    }

    // Returns the extraction and the composite's cell total (zero when not
    // accumulating).
    fn run_extraction<T: Sample>(&self, frame: &Frame<T>, config: &ContourConfig,
                                 accumulate: bool)
                                 -> Result<(HitExtraction, i64), tonic::Status> {
        let (width, height, _channels) =
            frame.dimensions().map_err(status_from_hit_error)?;
        if !accumulate {
            let mut scratch = new_accumulator(width, height);
            let extraction = extract_hits(frame, config, &mut scratch)
                .map_err(status_from_hit_error)?;
            return Ok((extraction, 0));
        }
        let mut guard = self.lock_accumulator()?;
        let accumulator = guard.get_or_insert_with(|| {
            info!("Starting {}x{} composite accumulator", width, height);
            new_accumulator(width, height)
        });
        let extraction = extract_hits(frame, config, accumulator)
            .map_err(status_from_hit_error)?;
        let total = accumulator.iter().map(|&cell| cell as i64).sum();
        Ok((extraction, total))
    }

    fn extract(&self, req: hit_detect::HitsRequest)
               -> Result<hit_detect::HitsResult, tonic::Status> {
        let rpc_start = Instant::now();
        let input_image = match req.input_image {
            Some(image) => image,
            None => return Err(tonic::Status::invalid_argument(
                "Request 'input_image' field is missing")),
        };
        let pixel_type = PixelType::try_from(input_image.pixel_type).map_err(
            |_| tonic::Status::invalid_argument(format!(
                "Unknown pixel_type {}", input_image.pixel_type)))?;
        if input_image.width <= 0 || input_image.height <= 0 ||
            !(input_image.channels == 1 || input_image.channels == 3)
        {
            return Err(tonic::Status::invalid_argument(format!(
                "Invalid image dimensions {}x{}x{}", input_image.width,
                input_image.height, input_image.channels)));
        }
        let width = input_image.width as usize;
        let height = input_image.height as usize;
        let channels = input_image.channels as usize;
        let bytes_per_sample = match pixel_type {
            PixelType::U8 => 1,
            PixelType::U16 => 2,
            PixelType::F32 => 4,
        };
        let num_bytes = match width.checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .and_then(|n| n.checked_mul(bytes_per_sample))
        {
            Some(num_bytes) => num_bytes,
            None => return Err(tonic::Status::invalid_argument(format!(
                "Image dimensions {}x{}x{} are too large", width, height,
                channels))),
        };

        let shmem;
        let bytes: &[u8] = match &input_image.shmem_name {
            Some(name) => {
                shmem = SharedMemory::open(name, num_bytes)?;
                shmem.as_slice()
            },
            None => &input_image.image_data,
        };
        if bytes.len() != num_bytes {
            return Err(tonic::Status::invalid_argument(format!(
                "Image data has {} bytes; expected {}", bytes.len(), num_bytes)));
        }
        let shape: Vec<usize> = if channels == 1 {
            vec![height, width]
        } else {
            vec![height, width, channels]
        };

        let config = contour_config(req.params);
        let (extraction, accumulator_total) = match pixel_type {
            PixelType::U8 => {
                self.run_extraction(&Frame::new(&shape, bytes), &config,
                                    req.accumulate)?
            },
            PixelType::U16 => {
                let samples: Vec<u16> = bytes.chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();
                self.run_extraction(&Frame::new(&shape, &samples), &config,
                                    req.accumulate)?
            },
            PixelType::F32 => {
                let samples: Vec<f32> = bytes.chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                self.run_extraction(&Frame::new(&shape, &samples), &config,
                                    req.accumulate)?
            },
        };

        let hits = extraction.hits.iter().map(|hit| hit_detect::Hit{
            cx: hit.cx,
            cy: hit.cy,
            area: hit.area,
            roundness: hit.roundness,
        }).collect();
        Ok(hit_detect::HitsResult{
            hits,
            binary_image: if req.return_binary {
                Some(gray_to_proto(&extraction.binary))
            } else {
                None
            },
            accumulator_total,
            algorithm_time: prost_types::Duration::try_from(
                rpc_start.elapsed()).ok(),
        })
    }
}

#[tonic::async_trait]
impl HitDetect for MyHitDetect {
    async fn extract_hits(
        &self, request: tonic::Request<hit_detect::HitsRequest>)
        -> Result<tonic::Response<hit_detect::HitsResult>, tonic::Status>
    {
        let response = self.extract(request.into_inner())?;
        Ok(tonic::Response::new(response))
    }

    async fn get_accumulator(
        &self, _request: tonic::Request<hit_detect::AccumulatorRequest>)
        -> Result<tonic::Response<hit_detect::AccumulatorResult>, tonic::Status>
    {
        let guard = self.lock_accumulator()?;
        Ok(tonic::Response::new(hit_detect::AccumulatorResult{
            accumulator: guard.as_ref().map(gray_to_proto),
        }))
    }

    async fn reset_accumulator(
        &self, request: tonic::Request<hit_detect::ResetRequest>)
        -> Result<tonic::Response<hit_detect::ResetResult>, tonic::Status>
    {
        let discard = request.into_inner().discard;
        let mut guard = self.lock_accumulator()?;
        if discard {
            info!("Discarding composite accumulator");
            *guard = None;
        } else if let Some(accumulator) = guard.as_mut() {
            info!("Zeroing composite accumulator");
            reset_accumulator(accumulator);
        }
        Ok(tonic::Response::new(hit_detect::ResetResult{}))
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Port that the gRPC server listens on.
    #[arg(short, long, default_value_t = 50051)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // Listen on any address for the given port.
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("HitDetectServer listening on {}", addr);

    tonic::transport::Server::builder()
        .accept_http1(true)
        .layer(GrpcWebLayer::new())
        .add_service(HitDetectServer::new(
            MyHitDetect{accumulator: Mutex::new(None)}))
        .serve(addr)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8_request(width: i32, height: i32, data: Vec<u8>, accumulate: bool)
                  -> hit_detect::HitsRequest {
        hit_detect::HitsRequest{
            input_image: Some(hit_detect::Image{
                width, height, channels: 1,
                pixel_type: PixelType::U8 as i32,
                image_data: data,
                shmem_name: None,
            }),
            params: Some(hit_detect::ContourParams{
                threshold_value: Some(100),
                contour_max_area: Some(10),
                ..Default::default()
            }),
            accumulate,
            return_binary: true,
        }
    }

    // 8x8 frame with one 2x2 blob whose hit lands at (3, 4).
    fn blob_frame() -> Vec<u8> {
        let mut data = vec![0_u8; 64];
        for (x, y) in [(3, 4), (4, 4), (3, 5), (4, 5)] {
            data[y * 8 + x] = 255;
        }
        data
    }

    #[test]
    fn test_extract_accumulates() {
        let service = MyHitDetect{accumulator: Mutex::new(None)};
        let result = service.extract(u8_request(8, 8, blob_frame(), true)).unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!((result.hits[0].cx, result.hits[0].cy), (3, 4));
        assert_eq!(result.accumulator_total, 1);
        let binary = result.binary_image.unwrap();
        assert_eq!(binary.image_data.iter().filter(|&&p| p == 255).count(), 4);

        let result = service.extract(u8_request(8, 8, blob_frame(), true)).unwrap();
        assert_eq!(result.accumulator_total, 2);
        let guard = service.accumulator.lock().unwrap();
        assert_eq!(guard.as_ref().unwrap().get_pixel(3, 4).0[0], 2);
    }

    #[test]
    fn test_extract_without_accumulating() {
        let service = MyHitDetect{accumulator: Mutex::new(None)};
        let result = service.extract(u8_request(8, 8, blob_frame(), false)).unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.accumulator_total, 0);
        assert!(service.accumulator.lock().unwrap().is_none());
    }

    #[test]
    fn test_extract_size_change_needs_discard() {
        let service = MyHitDetect{accumulator: Mutex::new(None)};
        service.extract(u8_request(8, 8, blob_frame(), true)).unwrap();
        let status = service.extract(
            u8_request(4, 4, vec![0_u8; 16], true)).unwrap_err();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        // A non-accumulating request of another size is fine.
        assert!(service.extract(u8_request(4, 4, vec![0_u8; 16], false)).is_ok());
    }

    #[test]
    fn test_extract_bad_requests() {
        let service = MyHitDetect{accumulator: Mutex::new(None)};
        let mut req = u8_request(8, 8, blob_frame(), false);
        req.input_image = None;
        assert_eq!(service.extract(req).unwrap_err().code(),
                   tonic::Code::InvalidArgument);

        // Data length disagrees with dimensions.
        let req = u8_request(8, 9, blob_frame(), false);
        assert_eq!(service.extract(req).unwrap_err().code(),
                   tonic::Code::InvalidArgument);

        let mut req = u8_request(8, 8, blob_frame(), false);
        if let Some(image) = req.input_image.as_mut() {
            image.channels = 2;
        }
        assert_eq!(service.extract(req).unwrap_err().code(),
                   tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_extract_u16_frame() {
        let service = MyHitDetect{accumulator: Mutex::new(None)};
        let mut bytes = Vec::<u8>::new();
        for value in blob_frame() {
            let sample: u16 = if value > 0 { 40000 } else { 1000 };
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let mut req = u8_request(8, 8, bytes, false);
        if let Some(image) = req.input_image.as_mut() {
            image.pixel_type = PixelType::U16 as i32;
        }
        let result = service.extract(req).unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!((result.hits[0].cx, result.hits[0].cy), (3, 4));
    }

    #[test]
    fn test_contour_config_defaults() {
        assert_eq!(contour_config(None), ContourConfig::default());
        assert_eq!(contour_config(Some(hit_detect::ContourParams::default())),
                   ContourConfig::default());
        let config = contour_config(Some(hit_detect::ContourParams{
            adaptive: Some(true),
            adaptive_blocksize: Some(9),
            roundness_pi: Some(3.14),
            ..Default::default()
        }));
        assert!(config.adaptive);
        assert_eq!(config.adaptive_blocksize, 9);
        assert_eq!(config.roundness_pi, 3.14);

        // Only the threshold given; everything else keeps its default.
        let config = contour_config(Some(hit_detect::ContourParams{
            threshold_value: Some(40),
            ..Default::default()
        }));
        assert_eq!(config, ContourConfig{threshold_value: 40,
                                         ..Default::default()});
        // Explicit zeros are honored.
        let config = contour_config(Some(hit_detect::ContourParams{
            contour_max_area: Some(0),
            adaptive_shift: Some(0.0),
            ..Default::default()
        }));
        assert_eq!(config.contour_max_area, 0);
        assert_eq!(config.adaptive_shift, 0.0);
    }

    #[test]
    fn test_extract_oversized_dimensions() {
        let service = MyHitDetect{accumulator: Mutex::new(None)};
        let mut req = u8_request(i32::MAX, i32::MAX, Vec::new(), false);
        if let Some(image) = req.input_image.as_mut() {
            image.channels = 3;
            image.pixel_type = PixelType::F32 as i32;
        }
        assert_eq!(service.extract(req).unwrap_err().code(),
                   tonic::Code::InvalidArgument);
    }
}  // mod tests.
