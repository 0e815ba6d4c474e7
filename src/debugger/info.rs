use serde::Serialize;
use std::path::PathBuf;

/// Seed of the cell file name hash, front ends use it to locate cell sources.
pub const HASH_SEED: u32 = 0xC70F_6907;
pub const HASH_METHOD: &str = "Murmur2";
pub const TMP_FILE_SUFFIX: &str = ".py";
const TMP_PROCESS_NAME: &str = "xpython";

/// Static capabilities advertised to the front end.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerInfo {
    pub hash_method: &'static str,
    pub hash_seed: u32,
    pub tmp_file_prefix: String,
    pub tmp_file_suffix: &'static str,
    pub rich_rendering: bool,
    pub exception_paths: Vec<String>,
    pub copy_to_globals: bool,
}

impl DebuggerInfo {
    pub fn current() -> Self {
        Self {
            hash_method: HASH_METHOD,
            hash_seed: HASH_SEED,
            tmp_file_prefix: tmp_prefix(),
            tmp_file_suffix: TMP_FILE_SUFFIX,
            rich_rendering: true,
            exception_paths: vec!["Python Exceptions".to_string()],
            copy_to_globals: true,
        }
    }
}

/// Directory holding cell sources of this process, ends with a path separator.
pub fn tmp_prefix() -> String {
    format!(
        "{}/{TMP_PROCESS_NAME}_{}/",
        std::env::temp_dir().display().to_string().trim_end_matches('/'),
        std::process::id()
    )
}

/// Scratch directory for backend logs of this process.
pub fn debug_logs_dir() -> PathBuf {
    std::env::temp_dir().join(format!("xpython_debug_logs_{}", std::process::id()))
}

/// Path of the file holding the source of a code cell.
pub fn cell_tmp_file(code: &str) -> String {
    format!(
        "{}{}{TMP_FILE_SUFFIX}",
        tmp_prefix(),
        murmur2(code.as_bytes(), HASH_SEED)
    )
}

/// 32-bit MurmurHash2.
pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ (data.len() as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate().rev() {
            h ^= (*byte as u32) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}
