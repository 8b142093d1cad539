// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use env_logger;
use image::{DynamicImage, GrayImage, ImageReader, Rgb};
use imageproc::drawing;
use log::{info, warn};

use hit_detect::{extract_hits, new_accumulator, ChannelOrder, ContourConfig,
                 Frame, HitError, HitExtraction};

/// Example program for running the HitDetect algorithm on test image(s).
/// Hits from all processed images are summed into one composite.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Path of the file or directory to process.
    #[arg(short, long)]
    input: String,

    /// Directory where output file(s) are written.
    #[arg(short, long)]
    output: String,

    /// TOML file with contour settings. Flags below override it.
    #[arg(long)]
    config: Option<String>,

    /// Use adaptive (local mean) thresholding.
    #[arg(short, long, default_value_t = false)]
    adaptive: std::primitive::bool,

    /// Fixed threshold; pixels at or above it are foreground.
    #[arg(short, long)]
    threshold_value: Option<i32>,

    /// Neighborhood size for adaptive thresholding.
    #[arg(short, long)]
    blocksize: Option<i32>,

    /// Amount subtracted from the local mean for adaptive thresholding.
    #[arg(short, long, allow_negative_numbers = true)]
    shift: Option<f64>,

    /// Minimum number of boundary vertices.
    #[arg(long)]
    min_size: Option<i32>,

    /// Smallest accepted hit area (inclusive).
    #[arg(long)]
    min_area: Option<i32>,

    /// Largest accepted hit area (inclusive).
    #[arg(long)]
    max_area: Option<i32>,

    /// Value of pi used in the roundness measure.
    #[arg(long)]
    roundness_pi: Option<f64>,

    /// Output list of hit centroids.
    #[arg(short, long, default_value_t = false)]
    coords: std::primitive::bool,
}

fn contour_config(args: &Args) -> ContourConfig {
    let mut config = match &args.config {
        Some(path) => ContourConfig::from_file(Path::new(path)).unwrap_or_else(|e| {
            panic!("Could not load config '{}': {}", path, e);
        }),
        None => ContourConfig::default(),
    };
    if args.adaptive {
        config.adaptive = true;
    }
    if let Some(v) = args.threshold_value { config.threshold_value = v; }
    if let Some(v) = args.blocksize { config.adaptive_blocksize = v; }
    if let Some(v) = args.shift { config.adaptive_shift = v; }
    if let Some(v) = args.min_size { config.contour_min_size = v; }
    if let Some(v) = args.min_area { config.contour_min_area = v; }
    if let Some(v) = args.max_area { config.contour_max_area = v; }
    if let Some(v) = args.roundness_pi { config.roundness_pi = v; }
    config
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = contour_config(&args);
    info!("Using {:?}", config);
    let input_metadata = fs::metadata(&args.input).unwrap_or_else(|e| {
        panic!("Input file/dir '{}' does not exist? {:?}", args.input, e);
    });
    let output_metadata = fs::metadata(&args.output).unwrap_or_else(|e| {
        panic!("Output dir '{}' does not exist? {:?}", args.output, e);
    });
    assert!(output_metadata.is_dir(),
            "Output '{}' must be a directory", args.output);

    // Sized by the first image that decodes.
    let mut composite: Option<GrayImage> = None;
    if input_metadata.is_dir() {
        // Enumerate and process all of the files in the directory.
        let mut paths: Vec<PathBuf> = fs::read_dir(&args.input).unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        for path in paths {
            process_file(&path, &args, &config, &mut composite);
        }
    } else {
        // Process the single file.
        assert!(input_metadata.is_file());
        process_file(Path::new(&args.input), &args, &config, &mut composite);
    }

    match composite {
        Some(composite) => {
            let mut composite_path = PathBuf::from(&args.output);
            composite_path.push("composite.png");
            let total: u64 = composite.iter().map(|&cell| cell as u64).sum();
            info!("Composite has {} hit(s); writing {:?}", total, composite_path);
            composite.save(composite_path).unwrap();
        },
        None => warn!("No images processed"),
    }
}

// Runs the pipeline on the decoded image, handing its samples to the library
// in their native type where the library accepts them.
fn extract_from_image(img: &DynamicImage, config: &ContourConfig,
                      accumulator: &mut GrayImage)
                      -> Result<HitExtraction, HitError> {
    let (width, height) = (img.width(), img.height());
    match img {
        DynamicImage::ImageLuma8(gray) =>
            extract_hits(&Frame::from(gray), config, accumulator),
        DynamicImage::ImageLuma16(gray) =>
            extract_hits(&Frame::gray(width, height, gray.as_raw()),
                         config, accumulator),
        DynamicImage::ImageRgb8(rgb) =>
            extract_hits(&Frame::color(width, height, rgb.as_raw(),
                                       ChannelOrder::Rgb),
                         config, accumulator),
        DynamicImage::ImageRgb16(rgb) =>
            extract_hits(&Frame::color(width, height, rgb.as_raw(),
                                       ChannelOrder::Rgb),
                         config, accumulator),
        DynamicImage::ImageRgb32F(rgb) =>
            extract_hits(&Frame::color(width, height, rgb.as_raw(),
                                       ChannelOrder::Rgb),
                         config, accumulator),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageRgba8(_) => {
            let rgb = img.to_rgb8();
            extract_hits(&Frame::color(width, height, rgb.as_raw(),
                                       ChannelOrder::Rgb),
                         config, accumulator)
        },
        DynamicImage::ImageLumaA16(_) | DynamicImage::ImageRgba16(_) => {
            let rgb = img.to_rgb16();
            extract_hits(&Frame::color(width, height, rgb.as_raw(),
                                       ChannelOrder::Rgb),
                         config, accumulator)
        },
        _ => {
            let rgb = img.to_rgb32f();
            extract_hits(&Frame::color(width, height, rgb.as_raw(),
                                       ChannelOrder::Rgb),
                         config, accumulator)
        },
    }
}

fn process_file(input_path: &Path, args: &Args, config: &ContourConfig,
                composite: &mut Option<GrayImage>) {
    info!("Processing {:?}", input_path);
    let mut output_path = PathBuf::from(&args.output);
    output_path.push(input_path.file_name().unwrap());
    output_path.set_extension("bmp");
    let mut binary_path = output_path.clone();
    binary_path.set_file_name(format!(
        "{}_binary.bmp",
        input_path.file_stem().unwrap().to_string_lossy()));

    let img = match ImageReader::open(input_path).and_then(
        |reader| reader.with_guessed_format())
    {
        Ok(reader) => match reader.decode() {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping {:?} due to: {:?}", input_path, e);
                return;
            },
        },
        Err(e) => {
            warn!("Skipping {:?} due to: {:?}", input_path, e);
            return;
        },
    };
    let (width, height) = (img.width(), img.height());

    let accumulator = composite.get_or_insert_with(
        || new_accumulator(width, height));
    let hit_extraction_start = Instant::now();
    let extraction = match extract_from_image(&img, config, accumulator) {
        Ok(extraction) => extraction,
        Err(e) => {
            warn!("Skipping {:?} due to: {}", input_path, e);
            return;
        },
    };
    let elapsed = hit_extraction_start.elapsed();
    let hits = extraction.hits;
    info!("WxH: {}x{}; {:?}", width, height, img.color());
    info!("Hit extraction found {} hits in {:?}", hits.len(), elapsed);
    info!("{}ms per megapixel\n",
          elapsed.as_secs_f64() * 1000.0 / ((width * height) as f64 / 1000000.0));

    // Scribble marks into the image showing where we found hits.
    let mut img_color = img.into_rgb8();
    for hit in &hits {
        drawing::draw_hollow_circle_mut(
            &mut img_color, (hit.cx, hit.cy), 4, Rgb::<u8>([255, 0, 0]));
    }
    img_color.save(output_path).unwrap();
    extraction.binary.save(binary_path).unwrap();

    if args.coords {
        let mut coords_str = String::new();
        coords_str.push_str(format!("# WxH {}x{}\n", width, height).as_str());
        coords_str.push_str("# (x, y, area, roundness)\n");
        for hit in hits {
            coords_str.push_str(format!(
                "({}, {}, {}, {:.3}),\n",
                hit.cx, hit.cy, hit.area, hit.roundness).as_str());
        }
        info!("{}", coords_str);
    }
}
