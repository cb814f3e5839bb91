//! Breakpoint overlay over the engine breakpoint list.
//!
//! Breakpoints are addressed by source location (file, 1-based line). The engine list supports
//! only insertion and removal, so changing the enabled flag recreates the breakpoint.

use crate::engine::{Breakpoint, DebugEngine, SourceBreakpoint};
use crate::error::{Error, Result};
use itertools::Itertools;
use log::{debug, warn};
use std::sync::Arc;

/// Optional breakpoint attributes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreakpointOptions {
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

pub struct BreakpointStore {
    engine: Arc<dyn DebugEngine>,
}

impl BreakpointStore {
    pub fn new(engine: Arc<dyn DebugEngine>) -> Self {
        Self { engine }
    }

    /// Install a breakpoint, replacing one already at the same location.
    ///
    /// `verified` of the result reflects the immediate engine answer only, it may change later
    /// while sessions run.
    pub async fn set(&self, file: &str, line: u32, options: BreakpointOptions) -> Result<Breakpoint> {
        self.remove(file, line).await?;

        let source = SourceBreakpoint {
            file: file.to_string(),
            line,
            column: None,
            condition: options.condition,
            hit_condition: options.hit_condition,
            log_message: options.log_message,
            enabled: true,
        };
        self.install(source).await
    }

    async fn install(&self, source: SourceBreakpoint) -> Result<Breakpoint> {
        let (file, line) = (source.file.clone(), source.line);
        let installed = self.engine.add_breakpoints(vec![source]).await?;
        let bp = installed
            .into_iter()
            .find(|bp| bp.is_at(&file, line))
            .ok_or_else(|| Error::Engine(anyhow::anyhow!("breakpoint {file}:{line} was not installed")))?;

        debug!(target: "bridge", "breakpoint {} at {file}:{line} (verified: {})", bp.id, bp.verified);
        Ok(bp)
    }

    /// Remove breakpoints at the location, returns whether anything matched.
    pub async fn remove(&self, file: &str, line: u32) -> Result<bool> {
        let ids = self
            .engine
            .breakpoints()
            .into_iter()
            .filter(|bp| bp.is_at(file, line))
            .map(|bp| bp.id)
            .collect_vec();
        if ids.is_empty() {
            return Ok(false);
        }

        self.engine.remove_breakpoints(&ids).await?;
        Ok(true)
    }

    /// Recreate the breakpoint at the location with a new enabled flag.
    pub async fn toggle(&self, file: &str, line: u32, enabled: bool) -> Result<Breakpoint> {
        let existing = self
            .engine
            .breakpoints()
            .into_iter()
            .find(|bp| bp.is_at(file, line))
            .ok_or_else(|| Error::BreakpointNotFound {
                file: file.to_string(),
                line,
            })?;

        self.engine
            .remove_breakpoints(std::slice::from_ref(&existing.id))
            .await?;

        let source = SourceBreakpoint {
            enabled,
            ..SourceBreakpoint::from(&existing)
        };
        match self.install(source).await {
            Ok(bp) => Ok(bp),
            Err(e) => {
                warn!(target: "bridge", "toggle {file}:{line} failed, restoring breakpoint: {e}");
                if let Err(restore) = self.install(SourceBreakpoint::from(&existing)).await {
                    warn!(target: "bridge", "restore breakpoint {file}:{line}: {restore}");
                }
                Err(e)
            }
        }
    }

    pub fn all(&self) -> Vec<Breakpoint> {
        self.engine.breakpoints()
    }

    pub fn by_file(&self, file: &str) -> Vec<Breakpoint> {
        self.engine
            .breakpoints()
            .into_iter()
            .filter(|bp| bp.file == file)
            .collect()
    }

    /// Remove every breakpoint, returns the number removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let ids = self.engine.breakpoints().into_iter().map(|bp| bp.id).collect_vec();
        self.remove_ids(ids).await
    }

    /// Remove every breakpoint of a file, returns the number removed.
    pub async fn clear_file(&self, file: &str) -> Result<usize> {
        let ids = self.by_file(file).into_iter().map(|bp| bp.id).collect_vec();
        self.remove_ids(ids).await
    }

    async fn remove_ids(&self, ids: Vec<String>) -> Result<usize> {
        if !ids.is_empty() {
            self.engine.remove_breakpoints(&ids).await?;
        }
        Ok(ids.len())
    }
}
