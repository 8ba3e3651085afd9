//! Camera registry.
//!
//! The registry is a header-first CSV file. Each data row carries an enable
//! flag, a display name and a connection descriptor:
//!
//! ```text
//! use,name,access
//! +,Lobby,rtsp://10.0.0.5/stream1
//! -,Garage,/dev/video2
//! +,Dock,stub://dock?width=320&height=240
//! ```
//!
//! Only rows flagged `+` are loaded. Ids are assigned sequentially in file
//! order and are stable for the lifetime of the process.

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// One configured camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: usize,
    pub name: String,
    pub descriptor: String,
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cam({},{})", self.id, self.name)
    }
}

pub fn load_registry(path: &Path) -> Result<Vec<SourceInfo>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open camera registry {}", path.display()))?;
    parse_registry(file).with_context(|| format!("invalid camera registry {}", path.display()))
}

pub fn parse_registry(reader: impl Read) -> Result<Vec<SourceInfo>> {
    let mut sources = Vec::new();
    // First line is the header.
    for (index, line) in BufReader::new(reader).lines().enumerate().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.splitn(3, ',').map(str::trim).collect();
        if fields.len() < 3 {
            return Err(anyhow!(
                "line {}: expected `flag,name,descriptor`, got {:?}",
                index + 1,
                line
            ));
        }
        if fields[0] != "+" {
            continue;
        }
        if fields[1].is_empty() {
            return Err(anyhow!("line {}: camera name is empty", index + 1));
        }
        sources.push(SourceInfo {
            id: sources.len(),
            name: fields[1].to_string(),
            descriptor: fields[2].to_string(),
        });
    }
    Ok(sources)
}
