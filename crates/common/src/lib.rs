/// Common types for the magazine fusion pipeline
mod affinity;
mod error;
mod image;
mod job;
mod pattern;
mod qa;
mod section;

pub use affinity::{AffinityEntry, AffinityMatrix};
pub use error::{ErrorKind, ErrorRecord, PipelineError, Result, Warning, WarningKind};
pub use image::{ImageAsset, ImageAttributes, ImageQuality, ImageSetRef, PerceptualHash};
pub use job::{Job, JobCheckpoint, JobResult, JobStatus};
pub use pattern::{LayoutPattern, LengthBucket};
pub use qa::{QaMap, QaPair};
pub use section::{EmphasisFlags, LayoutStrategy, MagazinePlan, Section, SectionKind};
