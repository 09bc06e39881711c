//! Label resolution.

use super::builder::{Entry, Program};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Label {0} not found")]
    MissingLabel(String),

    #[error("Label {0} is bound to more than one instruction")]
    DuplicateLabel(String),
}

/// Resolve every target in place.
///
/// All labels are checked before anything is written, so on error the
/// entries are left untouched.
pub fn link_entries(entries: &mut [Entry]) -> Result<(), LinkError> {
    let mut addresses: HashMap<&str, usize> = HashMap::new();
    for (address, entry) in entries.iter().enumerate() {
        if let Some(label) = &entry.label {
            if addresses.insert(label.as_str(), address).is_some() {
                return Err(LinkError::DuplicateLabel(label.clone()));
            }
        }
    }

    let mut resolved = Vec::new();
    for (address, entry) in entries.iter().enumerate() {
        if let Some(target) = entry.instr.target() {
            let Some(&dest) = addresses.get(target.label.as_str()) else {
                return Err(LinkError::MissingLabel(target.label.clone()));
            };
            let value = if entry.instr.is_relative() {
                dest as i32 - address as i32 - 1
            } else {
                dest as i32
            };
            resolved.push((address, value));
        }
    }

    for (address, value) in resolved {
        if let Some(target) = entries[address].instr.target_mut() {
            target.resolved = Some(value);
        }
    }
    Ok(())
}

pub fn link(mut entries: Vec<Entry>) -> Result<Program, LinkError> {
    link_entries(&mut entries)?;
    log::debug!("linked {} instructions", entries.len());
    Ok(Program::from_linked(entries))
}
