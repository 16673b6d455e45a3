//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;

use super::pipeline_config::LogLevel;
use crate::domain::entities::{Gravity, Priority, Request, Tag};
use crate::domain::errors::RequestError;

#[derive(Debug, Parser)]
#[command(
    name = "hunter",
    version,
    about = "Fetch, decode and transform images through a coalescing priority pipeline",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Baseline worker count.
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Log every pipeline event.
    #[arg(long)]
    pub logging: bool,

    /// URLs or absolute file paths to load.
    #[arg(value_name = "RESOURCE")]
    pub resources: Vec<String>,

    /// Target size, e.g. `200x100`. A zero dimension keeps the aspect ratio.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    pub resize: Option<(u32, u32)>,

    /// Fill the target size and crop the overflow.
    #[arg(long, value_enum, value_name = "GRAVITY", conflicts_with = "center_inside")]
    pub center_crop: Option<Gravity>,

    /// Fit inside the target size.
    #[arg(long)]
    pub center_inside: bool,

    /// Never scale images up.
    #[arg(long)]
    pub only_scale_down: bool,

    /// Clockwise rotation in degrees.
    #[arg(long, value_name = "DEG", allow_hyphen_values = true)]
    pub rotate: Option<f32>,

    /// Scheduling priority.
    #[arg(long, value_enum)]
    pub priority: Option<Priority>,

    /// Tag grouping all requests of this run.
    #[arg(long)]
    pub tag: Option<String>,

    /// Pause the tag before loading and resume it afterwards.
    #[arg(long, requires = "tag")]
    pub pause_first: bool,
}

impl CliArgs {
    /// Builds the request for one positional resource from the shared flags.
    ///
    /// # Errors
    /// Returns `RequestError` if the fit flags are inconsistent.
    pub fn build_request(&self, resource: &str) -> Result<Request, RequestError> {
        let mut builder = Request::uri(resource);
        if let Some((width, height)) = self.resize {
            builder = builder.resize(width, height);
        }
        if let Some(gravity) = self.center_crop {
            builder = builder.center_crop(gravity);
        }
        if self.center_inside {
            builder = builder.center_inside();
        }
        if self.only_scale_down {
            builder = builder.only_scale_down();
        }
        if let Some(degrees) = self.rotate {
            builder = builder.rotate(degrees);
        }
        if let Some(priority) = self.priority {
            builder = builder.priority(priority);
        }
        if let Some(tag) = &self.tag {
            builder = builder.tag(Tag::named(tag.as_str()));
        }
        builder.build()
    }
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got `{value}`"))?;
    let width = width
        .trim()
        .parse()
        .map_err(|e| format!("invalid width `{width}`: {e}"))?;
    let height = height
        .trim()
        .parse()
        .map_err(|e| format!("invalid height `{height}`: {e}"))?;
    Ok((width, height))
}
