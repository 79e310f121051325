use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use tracing::{info, warn};

/// Normalized LED position, each component in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Sparse mapping from LED id to normalized position.
///
/// Built once at startup from the calibration output file and read-only
/// afterwards. Ids without a coordinate are valid and render as black.
pub struct CoordinateStore {
    coords: Vec<Option<Position>>,
}

impl CoordinateStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read coordinate file {}", path.display()))?;
        let store = Self::parse(&text)
            .with_context(|| format!("parse coordinate file {}", path.display()))?;
        info!(
            "Loaded {} LED coordinates (ids 0..{})",
            store.loaded_count(),
            store.len()
        );
        Ok(store)
    }

    /// Parse the coordinate text format: lines of `LED_<prefix>_<id> <x> <y> <z>`.
    ///
    /// Comment (`#`) and blank lines are skipped, as is any line not starting
    /// with `LED_`. The id is the integer after the last underscore; the rest
    /// of the prefix encodes channel information consumed by external tools.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut raw: Vec<(usize, f32, f32, f32)> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if !line.starts_with("LED_") {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                warn!("Skipping short coordinate line: {line:?}");
                continue;
            }
            let id_str = parts[0].rsplit('_').next().unwrap_or("");
            let id: usize = id_str
                .parse()
                .with_context(|| format!("unparseable LED id in line {line:?}"))?;
            let (x, y, z) = match (
                parts[1].parse::<f32>(),
                parts[2].parse::<f32>(),
                parts[3].parse::<f32>(),
            ) {
                (Ok(x), Ok(y), Ok(z)) => (x, y, z),
                _ => {
                    warn!("Skipping malformed coordinate line: {line:?}");
                    continue;
                }
            };
            raw.push((id, x, y, z));
        }

        if raw.is_empty() {
            bail!("no valid LED coordinate records");
        }

        let max_id = raw.iter().map(|r| r.0).max().unwrap_or(0);
        let mut coords = vec![None; max_id + 1];

        let (mut min, mut max) = ([f32::INFINITY; 3], [f32::NEG_INFINITY; 3]);
        for &(_, x, y, z) in &raw {
            for (i, v) in [x, y, z].into_iter().enumerate() {
                min[i] = min[i].min(v);
                max[i] = max[i].max(v);
            }
        }

        // Min-max normalization per axis; a degenerate axis maps to 0.5.
        let norm = |v: f32, axis: usize| -> f32 {
            let range = max[axis] - min[axis];
            if range > 0.0 {
                (v - min[axis]) / range
            } else {
                0.5
            }
        };
        for (id, x, y, z) in raw {
            coords[id] = Some(Position {
                x: norm(x, 0),
                y: norm(y, 1),
                z: norm(z, 2),
            });
        }

        Ok(Self { coords })
    }

    /// Normalized position for `id`, or `None` when the id has no coordinate.
    pub fn coord(&self, id: usize) -> Option<Position> {
        self.coords.get(id).copied().flatten()
    }

    /// Capacity of the store (max id + 1).
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    fn loaded_count(&self) -> usize {
        self.coords.iter().filter(|c| c.is_some()).count()
    }
}
