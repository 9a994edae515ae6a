/// Background dataset loading
///
/// At most one ingestion runs at a time. The load itself happens on a plain
/// worker thread (it is CPU bound and fans out to rayon); completion comes
/// back exactly once over a tokio oneshot channel, which the owner can either
/// poll without blocking or await.
use std::thread;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use crate::config::DatasetConfig;
use crate::dataset::{DatasetIndex, LoadReport};
use crate::error::{ConfigError, LoadError};
use crate::ingest;
use crate::settings::UserSettings;

pub type LoadOutcome = Result<(DatasetIndex, LoadReport), LoadError>;

struct InFlight {
    name: String,
    receiver: oneshot::Receiver<Result<(DatasetIndex, LoadReport), ConfigError>>,
}

#[derive(Default)]
pub struct DatasetLoader {
    in_flight: Option<InFlight>,
}

impl DatasetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Name of the dataset currently being loaded
    pub fn loading(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|f| f.name.as_str())
    }

    /// Start loading `name` on a worker thread; rejected while another load runs
    pub fn start(&mut self, name: &str, config: DatasetConfig, settings: UserSettings) -> Result<(), LoadError> {
        if let Some(in_flight) = &self.in_flight {
            warn!("Rejecting load of '{}': '{}' is still loading", name, in_flight.name);
            return Err(LoadError::Busy { loading: in_flight.name.clone() });
        }

        let (sender, receiver) = oneshot::channel();
        let worker_name = name.to_string();
        thread::Builder::new()
            .name(format!("load-{name}"))
            .spawn(move || {
                let result = ingest::load(&worker_name, &config, &settings);
                if sender.send(result).is_err() {
                    debug!("Load of '{}' finished after its receiver was dropped", worker_name);
                }
            })
            .map_err(|e| {
                error!("Failed to spawn loader thread for '{}': {}", name, e);
                LoadError::WorkerLost(name.to_string())
            })?;

        debug!("Started loading dataset '{}'", name);
        self.in_flight = Some(InFlight { name: name.to_string(), receiver });
        Ok(())
    }

    /// Take the finished load, if any, without blocking
    pub fn try_finish(&mut self) -> Option<(String, LoadOutcome)> {
        let in_flight = self.in_flight.as_mut()?;
        let outcome = match in_flight.receiver.try_recv() {
            Ok(result) => result.map_err(LoadError::from),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(LoadError::WorkerLost(in_flight.name.clone())),
        };
        let name = self.in_flight.take().map(|f| f.name).unwrap_or_default();
        Some((name, outcome))
    }

    /// Wait for the running load to finish. Returns None when idle.
    pub async fn wait(&mut self) -> Option<(String, LoadOutcome)> {
        let InFlight { name, receiver } = self.in_flight.take()?;
        let outcome = match receiver.await {
            Ok(result) => result.map_err(LoadError::from),
            Err(_) => Err(LoadError::WorkerLost(name.clone())),
        };
        Some((name, outcome))
    }
}
