#![allow(dead_code)]

use std::{fs, path::Path, sync::Once};

use radixdb::{Config, Db, Result};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn open(dir: &Path) -> Result<Db> {
    init_tracing();
    Db::open(Config::small(dir))
}

/// Every visible pair at a fresh snapshot, ascending.
pub fn dump(db: &Db) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let txn = db.begin(true)?;
    let pairs = txn.forward(b"")?.collect::<Result<Vec<_>>>()?;
    txn.rollback()?;
    Ok(pairs)
}

/// Copies the regular files of `from` into `to`.
pub fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}
