use async_trait::async_trait;
use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Activation control offered by the host.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Activate as soon as install completes.
  async fn skip_waiting(&self) -> Result<()>;

  /// Take control of every open client.
  async fn claim(&self) -> Result<()>;
}

/// Clients of the local front: there is nothing to hand over, so this only
/// records that the signals were given.
#[derive(Debug, Default)]
pub struct LocalClients {
  skipped_waiting: AtomicBool,
  claimed: AtomicBool,
}

impl LocalClients {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn skipped_waiting(&self) -> bool {
    self.skipped_waiting.load(Ordering::SeqCst)
  }

  #[cfg(test)]
  pub fn claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Clients for LocalClients {
  async fn skip_waiting(&self) -> Result<()> {
    self.skipped_waiting.store(true, Ordering::SeqCst);
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    if !self.claimed.swap(true, Ordering::SeqCst) {
      info!("worker now controls all clients");
    }
    Ok(())
  }
}
