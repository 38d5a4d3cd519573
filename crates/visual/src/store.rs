//! Baseline snapshot store with pixel comparison

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use image::{GenericImageView, Pixel, RgbaImage};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::BaselineMode;
use crate::error::{DiffArtifacts, VisualError, VisualResult};

/// Per-channel difference tolerated before a pixel counts as changed
const CHANNEL_TOLERANCE: i32 = 5;

static SNAPSHOT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*\.png$").expect("valid snapshot name pattern"));

/// Result of comparing two images
#[derive(Debug, Clone)]
pub struct VisualDiff {
    /// Whether the images match (within threshold)
    pub matches: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    pub diff_pixels: u64,
    pub total_pixels: u64,

    pub actual_hash: String,
    pub baseline_hash: String,
}

/// What happened to a capture in the store
#[derive(Debug, Clone)]
pub enum ComparisonOutcome {
    Matched(VisualDiff),
    /// No baseline existed; the capture became the baseline
    Created(PathBuf),
    /// Baseline overwritten in update mode
    Updated(PathBuf),
}

/// Filesystem store of accepted screenshots, one directory per suite
pub struct BaselineStore {
    baseline_dir: PathBuf,
    artifact_dir: PathBuf,

    /// Allowed share of differing pixels (0.0 - 100.0 percent)
    threshold: f64,

    mode: BaselineMode,

    // Serializes writers of the same baseline within this process
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl BaselineStore {
    pub fn new(
        baseline_dir: impl Into<PathBuf>,
        artifact_dir: impl Into<PathBuf>,
        threshold: f64,
        mode: BaselineMode,
    ) -> VisualResult<Self> {
        let baseline_dir = baseline_dir.into();
        let artifact_dir = artifact_dir.into();
        std::fs::create_dir_all(&baseline_dir)?;
        std::fs::create_dir_all(&artifact_dir)?;

        Ok(Self {
            baseline_dir,
            artifact_dir,
            threshold,
            mode,
            locks: DashMap::new(),
        })
    }

    pub fn mode(&self) -> BaselineMode {
        self.mode
    }

    /// Location of a baseline, e.g. `<dir>/webhelp/footer_desktop.png`
    pub fn baseline_path(&self, suite: &str, snapshot: &str) -> VisualResult<PathBuf> {
        validate_snapshot_name(snapshot)?;
        Ok(self.baseline_dir.join(suite).join(snapshot))
    }

    /// Compare `actual` against the stored baseline for `snapshot`.
    ///
    /// A mismatch is returned as `ComparisonMismatch` after the actual,
    /// expected and diff images have been written next to each other in
    /// the artifact directory.
    pub fn check(&self, suite: &str, snapshot: &str, actual: &[u8]) -> VisualResult<ComparisonOutcome> {
        let baseline_path = self.baseline_path(suite, snapshot)?;

        if self.mode == BaselineMode::Update {
            let lock = self.lock_for(&baseline_path);
            let _guard = lock.lock();
            write_atomic(&baseline_path, actual)?;
            info!("Updated baseline {}", baseline_path.display());
            return Ok(ComparisonOutcome::Updated(baseline_path));
        }

        if !baseline_path.exists() {
            match self.mode {
                BaselineMode::Strict => {
                    return Err(VisualError::BaselineMissing(
                        baseline_path.to_string_lossy().to_string(),
                    ));
                }
                _ => {
                    let lock = self.lock_for(&baseline_path);
                    let _guard = lock.lock();

                    // Another case may have written it while we waited
                    if !baseline_path.exists() {
                        write_atomic(&baseline_path, actual)?;
                        info!("Created baseline {}", baseline_path.display());
                        return Ok(ComparisonOutcome::Created(baseline_path));
                    }
                }
            }
        }

        let expected = std::fs::read(&baseline_path)?;
        let (diff, diff_image) = compare_images(actual, &expected, self.threshold)?;

        if diff.matches {
            debug!("{} matches ({:.3}% differ)", snapshot, diff.diff_percent);
            return Ok(ComparisonOutcome::Matched(diff));
        }

        warn!(
            "Visual regression detected in '{}': {:.2}% pixels differ (threshold: {:.2}%)",
            snapshot, diff.diff_percent, self.threshold
        );

        let artifacts = self.write_artifacts(suite, snapshot, actual, &expected, diff_image)?;
        Err(VisualError::ComparisonMismatch {
            snapshot: snapshot.to_string(),
            diff_percent: diff.diff_percent,
            threshold: self.threshold,
            artifacts,
        })
    }

    fn write_artifacts(
        &self,
        suite: &str,
        snapshot: &str,
        actual: &[u8],
        expected: &[u8],
        diff_image: Option<RgbaImage>,
    ) -> VisualResult<DiffArtifacts> {
        let dir = self.artifact_dir.join(suite);
        std::fs::create_dir_all(&dir)?;

        let stem = snapshot.trim_end_matches(".png");
        let actual_path = dir.join(format!("{}-actual.png", stem));
        let expected_path = dir.join(format!("{}-expected.png", stem));
        std::fs::write(&actual_path, actual)?;
        std::fs::write(&expected_path, expected)?;

        let diff_path = match diff_image {
            Some(img) => {
                let path = dir.join(format!("{}-diff.png", stem));
                img.save(&path)?;
                Some(path)
            }
            None => None,
        };

        Ok(DiffArtifacts {
            actual: Some(actual_path),
            expected: Some(expected_path),
            diff: diff_path,
        })
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// All stored baselines, relative to the store root
    pub fn list_baselines(&self) -> VisualResult<Vec<String>> {
        let mut baselines = Vec::new();

        for entry in walkdir::WalkDir::new(&self.baseline_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().map(|e| e == "png").unwrap_or(false) {
                if let Ok(relative) = path.strip_prefix(&self.baseline_dir) {
                    baselines.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        baselines.sort();
        Ok(baselines)
    }

    /// Remove artifacts left by earlier runs
    pub fn clean_artifacts(&self) -> VisualResult<()> {
        for entry in std::fs::read_dir(&self.artifact_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// Compare two PNGs pixel by pixel.
///
/// Returns the diff summary and, when any pixel differs, an image with the
/// changed pixels in red over a dimmed copy of the actual capture. Images of
/// different sizes are compared over their union; pixels outside the overlap
/// count as changed.
pub fn compare_images(
    actual: &[u8],
    expected: &[u8],
    threshold: f64,
) -> VisualResult<(VisualDiff, Option<RgbaImage>)> {
    let actual_hash = hash_bytes(actual);
    let baseline_hash = hash_bytes(expected);

    let actual_img = image::load_from_memory(actual)?;
    let (width, height) = actual_img.dimensions();

    // Quick hash comparison
    if actual_hash == baseline_hash {
        return Ok((
            VisualDiff {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: u64::from(width) * u64::from(height),
                actual_hash,
                baseline_hash,
            },
            None,
        ));
    }

    let baseline_img = image::load_from_memory(expected)?;
    if actual_img.dimensions() != baseline_img.dimensions() {
        warn!(
            "Screenshot dimensions differ: actual {:?} vs baseline {:?}",
            actual_img.dimensions(),
            baseline_img.dimensions()
        );
    }

    let actual_rgba = actual_img.to_rgba8();
    let baseline_rgba = baseline_img.to_rgba8();

    let out_width = width.max(baseline_rgba.width());
    let out_height = height.max(baseline_rgba.height());
    let total_pixels = u64::from(out_width) * u64::from(out_height);

    let mut diff_img = RgbaImage::new(out_width, out_height);
    let mut diff_pixels = 0u64;

    for y in 0..out_height {
        for x in 0..out_width {
            let in_actual = x < width && y < height;
            let in_baseline = x < baseline_rgba.width() && y < baseline_rgba.height();

            let changed = match (in_actual, in_baseline) {
                (true, true) => pixels_differ(actual_rgba.get_pixel(x, y), baseline_rgba.get_pixel(x, y)),
                _ => true,
            };

            if changed {
                diff_pixels += 1;
                diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
            } else {
                let channels = actual_rgba.get_pixel(x, y).channels();
                diff_img.put_pixel(
                    x,
                    y,
                    image::Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128]),
                );
            }
        }
    }

    let diff_percent = if total_pixels == 0 {
        0.0
    } else {
        (diff_pixels as f64 / total_pixels as f64) * 100.0
    };
    let same_size = actual_img.dimensions() == baseline_img.dimensions();
    let matches = same_size && diff_percent <= threshold;

    Ok((
        VisualDiff {
            matches,
            diff_percent,
            diff_pixels,
            total_pixels,
            actual_hash,
            baseline_hash,
        },
        (diff_pixels > 0).then_some(diff_img),
    ))
}

/// Check if two pixels differ beyond anti-aliasing noise
fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (i32::from(*x) - i32::from(*y)).abs() > CHANNEL_TOLERANCE)
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write through a temp file in the target directory and rename into place,
/// so readers never see a partial image
fn write_atomic(path: &Path, bytes: &[u8]) -> VisualResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| VisualError::Config(format!("invalid baseline path: {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn validate_snapshot_name(name: &str) -> VisualResult<()> {
    if SNAPSHOT_NAME.is_match(name) && !name.contains("..") {
        Ok(())
    } else {
        Err(VisualError::Config(format!("invalid snapshot name: '{}'", name)))
    }
}
