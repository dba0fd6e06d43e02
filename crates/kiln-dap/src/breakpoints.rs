use indexmap::IndexMap;
use kiln_remote::RemoteBreakpoint;
use serde::{Deserialize, Serialize};

use crate::dap::types;
use crate::path_map::normalize_identity;

/// Message attached to breakpoints declared before a remote session exists.
pub const PENDING_MESSAGE: &str = "Breakpoint will be applied when the script is launched";

const NOT_ACKNOWLEDGED_MESSAGE: &str = "Breakpoint was not acknowledged by the script host";

/// One breakpoint as declared by the host in `setBreakpoints`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: i64,
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub verified: bool,
    pub message: Option<String>,
    /// Set once the remote host reported this breakpoint, making `id` a remote id.
    acknowledged: bool,
}

impl Breakpoint {
    pub fn spec(&self) -> SourceBreakpoint {
        SourceBreakpoint {
            line: self.line,
            condition: self.condition.clone(),
            hit_condition: self.hit_condition.clone(),
        }
    }

    pub fn to_dap(&self) -> types::Breakpoint {
        types::Breakpoint {
            id: self.id,
            verified: self.verified,
            line: self.line,
            message: self.message.clone(),
            source: None,
        }
    }

    fn apply_remote(&mut self, remote: &RemoteBreakpoint) {
        self.id = remote.id;
        self.acknowledged = true;
        self.verified = remote.verified;
        if let Some(line) = remote.line {
            self.line = line;
        }
        self.message = remote.message.clone();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FileBreakpoints {
    /// File identity as the host sent it; the map key is the normalized form.
    path: String,
    breakpoints: Vec<Breakpoint>,
    /// `false` while the set still has to be sent to the remote host.
    bound: bool,
}

/// A file's staged set, ready to be sent to the remote host in one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: String,
    pub breakpoints: Vec<SourceBreakpoint>,
}

/// Per-file breakpoint sets, in the order files were first registered.
#[derive(Debug, Default)]
pub struct BreakpointStore {
    files: IndexMap<String, FileBreakpoints>,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set for `path` with unverified breakpoints carrying local ids `1..=n`.
    ///
    /// `bound` records whether the set is (about to be) sent to a live session; unbound sets
    /// are handed out by [`BreakpointStore::take_next_staged`].
    pub fn replace(
        &mut self,
        path: &str,
        specs: &[SourceBreakpoint],
        bound: bool,
        message: Option<&str>,
    ) -> Vec<Breakpoint> {
        let breakpoints: Vec<Breakpoint> = specs
            .iter()
            .enumerate()
            .map(|(idx, spec)| Breakpoint {
                id: idx as i64 + 1,
                line: spec.line,
                condition: spec.condition.clone(),
                hit_condition: spec.hit_condition.clone(),
                verified: false,
                message: message.map(str::to_owned),
                acknowledged: false,
            })
            .collect();

        let key = normalize_identity(path);
        match self.files.get_mut(&key) {
            // Keep the original registration position.
            Some(entry) => {
                entry.path = path.to_owned();
                entry.breakpoints = breakpoints.clone();
                entry.bound = bound;
            }
            None => {
                self.files.insert(
                    key,
                    FileBreakpoints {
                        path: path.to_owned(),
                        breakpoints: breakpoints.clone(),
                        bound,
                    },
                );
            }
        }
        breakpoints
    }

    /// Stage the set for `path` until a session exists.
    pub fn stage(&mut self, path: &str, specs: &[SourceBreakpoint]) -> Vec<Breakpoint> {
        self.replace(path, specs, false, Some(PENDING_MESSAGE))
    }

    /// Overwrite the set for `path` in place with the remote host's binding results.
    ///
    /// Results are matched by position; entries the remote did not report stay unverified.
    /// Returns `None` when the set was replaced or removed while the remote call was in
    /// flight, since the results no longer describe it.
    pub fn bind(
        &mut self,
        path: &str,
        sent: &[SourceBreakpoint],
        results: &[RemoteBreakpoint],
    ) -> Option<Vec<Breakpoint>> {
        let entry = self.current_entry(path, sent)?;
        for (idx, bp) in entry.breakpoints.iter_mut().enumerate() {
            match results.get(idx) {
                Some(remote) => bp.apply_remote(remote),
                None => {
                    bp.verified = false;
                    bp.message = Some(NOT_ACKNOWLEDGED_MESSAGE.to_owned());
                }
            }
        }
        entry.bound = true;
        Some(entry.breakpoints.clone())
    }

    /// Mark every breakpoint of `path` unverified with `message`.
    pub fn reject(
        &mut self,
        path: &str,
        sent: &[SourceBreakpoint],
        message: &str,
    ) -> Option<Vec<Breakpoint>> {
        let entry = self.current_entry(path, sent)?;
        for bp in &mut entry.breakpoints {
            bp.verified = false;
            bp.message = Some(message.to_owned());
        }
        Some(entry.breakpoints.clone())
    }

    fn current_entry(
        &mut self,
        path: &str,
        sent: &[SourceBreakpoint],
    ) -> Option<&mut FileBreakpoints> {
        let entry = self.files.get_mut(&normalize_identity(path))?;
        let unchanged = entry.breakpoints.len() == sent.len()
            && entry
                .breakpoints
                .iter()
                .zip(sent)
                .all(|(bp, spec)| bp.spec() == *spec);
        unchanged.then_some(entry)
    }

    /// Apply a remote-pushed update to the breakpoint carrying `remote.id`.
    ///
    /// Only breakpoints the remote host already reported are candidates: local ids
    /// restart at 1 in every file and never name a remote breakpoint.
    pub fn update(&mut self, remote: &RemoteBreakpoint) -> Option<(String, Breakpoint)> {
        self.files.values_mut().find_map(|file| {
            let bp = file
                .breakpoints
                .iter_mut()
                .find(|bp| bp.acknowledged && bp.id == remote.id)?;
            bp.apply_remote(remote);
            Some((file.path.clone(), bp.clone()))
        })
    }

    /// Take the first staged file in registration order and mark it bound, so a
    /// flush never sends the same set twice.
    pub fn take_next_staged(&mut self) -> Option<StagedFile> {
        let file = self
            .files
            .values_mut()
            .find(|file| !file.bound && !file.breakpoints.is_empty())?;
        file.bound = true;
        Some(StagedFile {
            path: file.path.clone(),
            breakpoints: file.breakpoints.iter().map(Breakpoint::spec).collect(),
        })
    }

    /// Return every set to the staged state, e.g. when a new session is about to start.
    ///
    /// Ids are reassigned locally because remote ids belong to the previous session.
    pub fn unbind_all(&mut self) {
        for file in self.files.values_mut() {
            file.bound = false;
            for (idx, bp) in file.breakpoints.iter_mut().enumerate() {
                bp.id = idx as i64 + 1;
                bp.acknowledged = false;
                bp.verified = false;
                bp.message = Some(PENDING_MESSAGE.to_owned());
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&[Breakpoint]> {
        self.files
            .get(&normalize_identity(path))
            .map(|file| file.breakpoints.as_slice())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}
