//! Language server collaborator
//!
//! Instances only read state and diagnostics through this trait. Without a
//! language server wired in, [`NoLsp`] reports nothing.

use crate::error::{HearthError, Result};
use crate::proto::{Diagnostics, LspInfo};

pub trait LspService: Send + Sync {
    fn states(&self) -> Vec<LspInfo>;
    fn diagnostics(&self, name: &str) -> Result<Diagnostics>;
}

#[derive(Debug, Default)]
pub struct NoLsp;

impl LspService for NoLsp {
    fn states(&self) -> Vec<LspInfo> {
        Vec::new()
    }

    fn diagnostics(&self, name: &str) -> Result<Diagnostics> {
        Err(HearthError::LspNotFound(name.to_string()))
    }
}
