use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope, AST, FLOAT, INT};
use tracing::warn;

use crate::coords::CoordinateStore;

use super::params::{flatten_defaults, validate, ParamSchema};

/// Minimum spacing between logged evaluation errors of one animation.
const ERROR_LOG_INTERVAL_SECS: u64 = 1;

/// A compiled animation script: a `color(x, y, z, t, params, id)` function
/// plus its flattened default parameters. Immutable once constructed;
/// replaced wholesale on hot-swap.
pub struct Animation {
    engine: Engine,
    ast: AST,
    defaults: Map,
    schema: ParamSchema,
    source_path: PathBuf,
    started: Instant,
    last_error_log: AtomicU64,
}

impl Animation {
    /// Evaluate the script's color function for one LED.
    ///
    /// Returns `None` (meaning: render black) on any script error, wrong
    /// result shape, or non-finite component. Errors are logged at a bounded
    /// rate so a broken script cannot flood the log at frame rate.
    pub fn color(&self, x: f32, y: f32, z: f32, t: f32, id: usize) -> Option<[f32; 3]> {
        let mut scope = Scope::new();
        let result = self.engine.call_fn::<Dynamic>(
            &mut scope,
            &self.ast,
            "color",
            (
                x as FLOAT,
                y as FLOAT,
                z as FLOAT,
                t as FLOAT,
                self.defaults.clone(),
                id as INT,
            ),
        );
        match result {
            Ok(value) => match extract_rgb(&value) {
                Some(rgb) => Some(rgb),
                None => {
                    self.log_error(id, &format!("color() returned {value:?}"));
                    None
                }
            },
            Err(err) => {
                self.log_error(id, &err.to_string());
                None
            }
        }
    }

    pub fn defaults(&self) -> &Map {
        &self.defaults
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    fn log_error(&self, id: usize, detail: &str) {
        let now = self.started.elapsed().as_secs();
        let last = self.last_error_log.load(Ordering::Relaxed);
        if now >= last + ERROR_LOG_INTERVAL_SECS || last == 0 {
            self.last_error_log.store(now.max(1), Ordering::Relaxed);
            warn!(
                "Animation {} failed for LED {id}: {detail}",
                self.source_path.display()
            );
        }
    }
}

pub struct ScriptHost;

impl ScriptHost {
    /// Load and compile an animation script, extracting its parameter schema
    /// and flattened defaults. The coordinate store backs the ambient
    /// `coord(i)` helper available to scripts.
    pub fn load(path: &Path, coords: Arc<CoordinateStore>) -> Result<Animation, ScriptError> {
        let src = fs::read_to_string(path)
            .map_err(|err| ScriptError::new(format!("read script {}: {err}", path.display()), None))?;
        let engine = Self::create_engine(coords);

        let ast = engine.compile(&src).map_err(|err| {
            ScriptError::new(err.to_string(), Some(err.1))
                .with_context(format!("compile script {}", path.display()))
        })?;

        let has_color = ast
            .iter_functions()
            .any(|f| f.name == "color" && f.params.len() == 6);
        if !has_color {
            return Err(ScriptError::new(
                "script must define fn color(x, y, z, t, params, id)",
                None,
            )
            .with_context(format!("load script {}", path.display())));
        }

        let schema = Self::extract_schema(&engine, &ast)
            .map_err(|e| e.with_context(format!("load script {}", path.display())))?;
        let defaults = flatten_defaults(&schema);

        Ok(Animation {
            engine,
            ast,
            defaults,
            schema,
            source_path: path.to_path_buf(),
            started: Instant::now(),
            last_error_log: AtomicU64::new(0),
        })
    }

    /// Scripts may declare parameters by defining `fn params()` returning the
    /// two-level group map. Declarations are validated here so a bad schema
    /// fails the load instead of surfacing at edit time.
    fn extract_schema(engine: &Engine, ast: &AST) -> Result<ParamSchema, ScriptError> {
        let declares_params = ast
            .iter_functions()
            .any(|f| f.name == "params" && f.params.is_empty());
        if !declares_params {
            return Ok(ParamSchema::new());
        }

        let mut scope = Scope::new();
        let map: Map = engine
            .call_fn(&mut scope, ast, "params", ())
            .map_err(|err| ScriptError::from_eval(err, Some("evaluate params()")))?;

        let raw = serde_json::to_value(&map)
            .map_err(|err| ScriptError::new(format!("serialize params(): {err}"), None))?;
        let schema: ParamSchema = serde_json::from_value(raw)
            .map_err(|err| ScriptError::new(format!("invalid parameter schema: {err}"), None))?;
        validate(&schema).map_err(|msg| ScriptError::new(msg, None))?;
        Ok(schema)
    }

    fn create_engine(coords: Arc<CoordinateStore>) -> Engine {
        let mut engine = Engine::new();
        engine.on_print(|msg| tracing::info!("[script] {msg}"));

        // Ambient helper: another LED's normalized position, for scramble
        // effects. Absent or out-of-range ids yield unit, which scripts must
        // handle themselves.
        engine.register_fn("coord", move |id: INT| -> Dynamic {
            if id < 0 {
                return Dynamic::UNIT;
            }
            match coords.coord(id as usize) {
                Some(p) => {
                    let mut m = Map::new();
                    m.insert("x".into(), Dynamic::from_float(p.x as FLOAT));
                    m.insert("y".into(), Dynamic::from_float(p.y as FLOAT));
                    m.insert("z".into(), Dynamic::from_float(p.z as FLOAT));
                    Dynamic::from_map(m)
                }
                None => Dynamic::UNIT,
            }
        });

        engine
    }
}

fn extract_rgb(value: &Dynamic) -> Option<[f32; 3]> {
    let array = value.read_lock::<rhai::Array>()?;
    if array.len() != 3 {
        return None;
    }
    let mut rgb = [0.0f32; 3];
    for (i, item) in array.iter().enumerate() {
        let v = item
            .as_float()
            .ok()
            .or_else(|| item.as_int().ok().map(|n| n as FLOAT))?;
        if !v.is_finite() {
            return None;
        }
        rgb[i] = v as f32;
    }
    Some(rgb)
}

#[derive(Debug, Clone)]
pub struct ScriptError {
    pub message: String,
    pub position: Option<Position>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>, position: Option<Position>) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    pub fn with_context(mut self, context: impl AsRef<str>) -> Self {
        let ctx = context.as_ref();
        self.message = format!("{ctx}: {}", self.message);
        self
    }

    pub fn from_eval(err: Box<EvalAltResult>, context: Option<&str>) -> Self {
        let pos = err.position();
        let position = if pos == Position::NONE {
            None
        } else {
            Some(pos)
        };
        let mut err = ScriptError::new(err.to_string(), position);
        if let Some(ctx) = context {
            err = err.with_context(ctx);
        }
        err
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(pos) = self.position {
            let line = pos.line().unwrap_or(0);
            write!(f, "{} (line {line})", self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ScriptError {}
