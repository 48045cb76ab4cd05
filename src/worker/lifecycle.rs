use color_eyre::{eyre::eyre, Result};

/// Lifecycle state of one worker instance.
///
/// Transitions are strictly linear; a failed install ends in `Redundant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Activating,
  Active,
  Redundant,
}

impl WorkerState {
  /// Move to `next`, rejecting anything but the allowed successors.
  pub fn advance(self, next: WorkerState) -> Result<WorkerState> {
    use WorkerState::*;

    match (self, next) {
      (Installing, Activating) | (Installing, Redundant) | (Activating, Active) => Ok(next),
      _ => Err(eyre!("Invalid worker transition {} -> {}", self, next)),
    }
  }

  pub fn is_active(self) -> bool {
    self == WorkerState::Active
  }
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Installing => "installing",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    write!(f, "{}", name)
  }
}
