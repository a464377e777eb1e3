//! Raw PCM input

use std::fs;
use std::path::Path;

use crate::error::{Result, ScoreError};

/// Read a mono raw PCM file of little-endian 32-bit IEEE-754 floats.
///
/// The file size must be an exact multiple of 4 bytes; an empty file is
/// reported as `EmptyInput`.
pub fn read_f32le<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .map_err(|e| ScoreError::Io(format!("Cannot open input file {}: {}", path.display(), e)))?;

    if bytes.is_empty() {
        return Err(ScoreError::EmptyInput);
    }
    if bytes.len() % 4 != 0 {
        return Err(ScoreError::Io(format!(
            "Input file size is not aligned to float32 samples: {}",
            path.display()
        )));
    }

    let samples = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("audio2score_{}_{}", std::process::id(), name))
    }

    #[test]
    fn reads_little_endian_floats() {
        let path = temp_path("ok.f32");
        let mut file = fs::File::create(&path).unwrap();
        for value in [0.0f32, 1.0, -0.5] {
            file.write_all(&value.to_le_bytes()).unwrap();
        }
        drop(file);

        let samples = read_f32le(&path).unwrap();
        assert_eq!(samples, vec![0.0, 1.0, -0.5]);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_file_is_empty_input() {
        let path = temp_path("empty.f32");
        fs::File::create(&path).unwrap();
        match read_f32le(&path) {
            Err(ScoreError::EmptyInput) => {}
            other => panic!("expected EmptyInput, got {:?}", other),
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn misaligned_file_is_io_error() {
        let path = temp_path("odd.f32");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&[0, 1, 2, 3, 4]).unwrap();
        drop(file);
        match read_f32le(&path) {
            Err(ScoreError::Io(msg)) => assert!(msg.contains("not aligned")),
            other => panic!("expected Io, got {:?}", other),
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_io_error() {
        match read_f32le(temp_path("does_not_exist.f32")) {
            Err(ScoreError::Io(_)) => {}
            other => panic!("expected Io, got {:?}", other),
        }
    }
}
