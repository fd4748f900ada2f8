//! Cancellable asynchronous asset loading.
//!
//! The frame loop never blocks on IO: model loads run on a background
//! thread and deliver CPU-side [`MeshData`] over a channel. Because a
//! chapter can be swapped while a load is still in flight, every request
//! carries a generation from a monotonically increasing counter and a
//! result is applied only if its generation is still the latest — there
//! is no way to abort the work itself, only to guarantee its result is
//! ignored. A stale result is not an error; it is silently dropped.
//!
//! Load failures are errors of the asset, not of the chapter: they are
//! surfaced once at the boundary and not retried. The chapter keeps
//! whatever placeholder it was showing.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use log::{debug, warn};

use crate::mesh::{MeshData, Vertex3d};

/// Errors that can occur when loading an asset.
#[derive(Debug)]
pub enum LoadError {
    /// File could not be read.
    Io(std::io::Error),
    /// The asset data was invalid or corrupt.
    Parse(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "IO error: {}", e),
            LoadError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e)
    }
}

/// Monotonic counter for superseding in-flight async work.
///
/// Each request captures `issue()`; on arrival, `admit()` accepts the
/// result only while no newer request exists.
#[derive(Debug, Default)]
pub struct GenerationGate {
    latest: AtomicU64,
}

impl GenerationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, invalidating all earlier ones.
    pub fn issue(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a result from `generation` is still current.
    pub fn admit(&self, generation: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == generation
    }

    pub fn current(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }
}

struct Delivery {
    generation: u64,
    result: Result<MeshData, LoadError>,
}

/// Background STL model loader with generation-token cancellation.
pub struct ModelLoader {
    gate: Arc<GenerationGate>,
    tx: mpsc::Sender<Delivery>,
    rx: mpsc::Receiver<Delivery>,
}

impl ModelLoader {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            gate: Arc::new(GenerationGate::new()),
            tx,
            rx,
        }
    }

    /// Begin loading a model file, superseding any in-flight request.
    ///
    /// Returns the generation assigned to this request.
    pub fn request(&self, path: impl Into<PathBuf>) -> u64 {
        let generation = self.gate.issue();
        let path = path.into();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = load_stl_file(&path);
            // The chapter may already be gone; a dead channel is fine.
            let _ = tx.send(Delivery { generation, result });
        });
        generation
    }

    /// Drain delivered results and return the still-current one, if any.
    ///
    /// Stale generations are discarded without comment beyond a debug
    /// line; failures of the current generation are logged once and
    /// returned so the caller can keep its placeholder.
    pub fn poll(&self) -> Option<Result<MeshData, LoadError>> {
        let mut current = None;
        while let Ok(delivery) = self.rx.try_recv() {
            if !self.gate.admit(delivery.generation) {
                debug!(
                    "[loader] discarding stale result (generation {})",
                    delivery.generation
                );
                continue;
            }
            if let Err(e) = &delivery.result {
                warn!("[loader] model load failed: {}", e);
            }
            current = Some(delivery.result);
        }
        current
    }

    /// The gate, for chapters that run their own async work against the
    /// same supersession rules.
    pub fn gate(&self) -> &Arc<GenerationGate> {
        &self.gate
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse STL bytes into mesh data (binary or ASCII).
pub fn load_stl_bytes(bytes: &[u8]) -> Result<MeshData, LoadError> {
    let mut cursor = std::io::Cursor::new(bytes);
    load_stl(&mut cursor)
}

fn load_stl_file(path: &Path) -> Result<MeshData, LoadError> {
    let mut file = std::fs::File::open(path)?;
    load_stl(&mut file)
}

fn load_stl<R: Read + std::io::Seek>(reader: &mut R) -> Result<MeshData, LoadError> {
    let stl = stl_io::read_stl(reader).map_err(|e| LoadError::Parse(format!("STL: {}", e)))?;

    let mut vertices = Vec::with_capacity(stl.faces.len() * 3);
    let mut indices = Vec::with_capacity(stl.faces.len() * 3);
    for (i, face) in stl.faces.iter().enumerate() {
        let normal: [f32; 3] = face.normal.into();
        for &vertex_index in &face.vertices {
            let position: [f32; 3] = stl.vertices[vertex_index].into();
            // STL carries no UVs; chapters texture these procedurally.
            vertices.push(Vertex3d::new(position, normal, [0.0, 0.0]));
        }
        let base = (i * 3) as u32;
        indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    Ok(MeshData::new(vertices, indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_are_monotonic_and_supersede() {
        let gate = GenerationGate::new();
        let first = gate.issue();
        let second = gate.issue();
        assert!(second > first);
        assert!(!gate.admit(first), "superseded generation must not admit");
        assert!(gate.admit(second));
    }

    #[test]
    fn zero_generation_never_admits() {
        let gate = GenerationGate::new();
        assert!(!gate.admit(0));
        gate.issue();
        assert!(!gate.admit(0));
    }

    #[test]
    fn binary_stl_round_trips_into_mesh_data() {
        // Minimal binary STL: 80-byte header, u32 count, one triangle.
        let mut bytes = vec![0u8; 80];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        let floats: [f32; 12] = [
            0.0, 0.0, 1.0, // normal
            0.0, 0.0, 0.0, // v0
            1.0, 0.0, 0.0, // v1
            0.0, 1.0, 0.0, // v2
        ];
        for f in floats {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes()); // attribute count

        let mesh = load_stl_bytes(&bytes).expect("valid STL");
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn malformed_stl_is_a_parse_error() {
        let result = load_stl_bytes(&[1, 2, 3]);
        assert!(matches!(result, Err(LoadError::Parse(_))));
    }

    #[test]
    fn loader_delivers_current_generation_only() {
        let loader = ModelLoader::new();
        // Two requests for a file that does not exist: both complete with
        // errors, but only the newest generation may surface.
        loader.request("/nonexistent/model-a.stl");
        loader.request("/nonexistent/model-b.stl");

        // Wait for both worker threads to deliver.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut surfaced = 0;
        while std::time::Instant::now() < deadline {
            if let Some(result) = loader.poll() {
                surfaced += 1;
                assert!(result.is_err());
            }
            if surfaced > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(surfaced, 1, "exactly one (current) result surfaces");
    }
}
