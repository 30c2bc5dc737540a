//! Headless renderer: draws the overlays of one sample into a PNG.
//!
//! ```text
//! looker-probe <sample.json> <output.png> [--media image|frame|video] [--size WxH] [--settings settings.json]
//! ```
//!
//! Media dimensions come from the sample's `metadata.width` / `metadata.height`
//! when present, otherwise from the output size.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use looker::geometry::BoundingBox;
use looker::{
    AnyLooker, ERROR_EVENT, HostElement, LookerError, LookerEvent, LookerSettings, MediaConfig, MediaType,
    OptionsPatch, RasterCanvas, Result, Services, init_logging,
};
use serde_json::Value;

const DEFAULT_SIZE: (u32, u32) = (640, 480);
const DECODE_TIMEOUT: Duration = Duration::from_secs(10);
const BACKGROUND: [u8; 4] = [24, 24, 24, 255];

struct Args {
    sample: PathBuf,
    output: PathBuf,
    media: MediaType,
    size: (u32, u32),
    settings: Option<PathBuf>,
}

fn usage() -> LookerError {
    LookerError::Config(
        "usage: looker-probe <sample.json> <output.png> [--media image|frame|video] [--size WxH] [--settings FILE]".into(),
    )
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value.split_once('x').ok_or_else(usage)?;
    let parse = |v: &str| v.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(usage);
    Ok((parse(w)?, parse(h)?))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut media = MediaType::Image;
    let mut size = DEFAULT_SIZE;
    let mut settings = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--media" => media = args.next().ok_or_else(usage)?.parse()?,
            "--size" => size = parse_size(&args.next().ok_or_else(usage)?)?,
            "--settings" => settings = Some(PathBuf::from(args.next().ok_or_else(usage)?)),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let [sample, output]: [PathBuf; 2] = positional.try_into().map_err(|_| usage())?;
    Ok(Args {
        sample,
        output,
        media,
        size,
        settings,
    })
}

/// A host of fixed size at the window origin.
struct FixedHost {
    size: (u32, u32),
}

impl HostElement for FixedHost {
    fn bounding_box(&self) -> Option<BoundingBox> {
        Some([0.0, 0.0, self.size.0 as f32, self.size.1 as f32])
    }
}

fn media_dimensions(sample: &Value, fallback: (u32, u32)) -> [f32; 2] {
    let metadata = &sample["metadata"];
    match (metadata["width"].as_f64(), metadata["height"].as_f64()) {
        (Some(w), Some(h)) if w > 0.0 && h > 0.0 => [w as f32, h as f32],
        _ => [fallback.0 as f32, fallback.1 as f32],
    }
}

fn sample_id(sample: &Value, path: &Path) -> String {
    sample
        .get("id")
        .or_else(|| sample.get("_id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| path.display().to_string())
}

fn run(args: Args) -> Result<()> {
    let settings = match &args.settings {
        Some(path) => LookerSettings::load(path)?,
        None => LookerSettings::default(),
    };
    init_logging(settings.log_level);

    let sample: Value = serde_json::from_str(&std::fs::read_to_string(&args.sample)?)?;
    let mut config = MediaConfig::new(sample_id(&sample, &args.sample), media_dimensions(&sample, args.size));
    if let Some(frame_count) = sample["metadata"]["total_frame_count"].as_u64() {
        config = config.with_frame_count(u32::try_from(frame_count).unwrap_or(u32::MAX));
    }
    if let Some(frame_rate) = sample["metadata"]["frame_rate"].as_f64() {
        config = config.with_frame_rate(frame_rate as f32);
    }

    let canvas = Rc::new(RefCell::new(
        RasterCanvas::new(args.size.0, args.size.1).with_background(BACKGROUND),
    ));
    let services = Services::shared_with(settings)?;
    let mut looker = AnyLooker::new(
        args.media,
        sample,
        config,
        OptionsPatch::default(),
        Box::new(Rc::clone(&canvas)),
        services,
    )?;

    let failure = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&failure);
    looker.add_event_listener(ERROR_EVENT, move |event| {
        if let LookerEvent::Error(e) = event {
            *sink.borrow_mut() = Some(e.to_string());
        }
    });

    looker.attach(Box::new(FixedHost { size: args.size }));
    if looker.wait_for_messages(DECODE_TIMEOUT) == 0 {
        return Err(LookerError::WorkerUnavailable("timed out waiting for the decoded sample".into()));
    }
    if let Some(message) = failure.borrow_mut().take() {
        return Err(LookerError::unsupported(message));
    }

    log::info!(
        "Rendered {} overlays of {} to {}",
        looker.overlays().len(),
        looker.config().sample_id,
        args.output.display()
    );
    looker.detach();
    canvas.borrow().save(&args.output)
}

fn main() -> ExitCode {
    let result = parse_args(std::env::args().skip(1)).and_then(run);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("looker-probe: {e}");
            ExitCode::FAILURE
        }
    }
}
