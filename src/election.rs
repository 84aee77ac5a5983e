//! Master Election
//!
//! Picks one connected speaker of the pool as master and keeps it for as
//! long as it stays connected. Every change of master, including the loss
//! of the master with nobody to replace it, opens a new term.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::replication::Envelope;
use crate::speaker::{PoolListener, Speaker, SpeakerPool};

/// How a master is picked among connected speakers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionStrategy {
    /// First connected speaker in pool order
    #[default]
    Ordered,
    /// Any connected speaker, chosen uniformly
    Random,
}

/// The elected master for one term
#[derive(Clone)]
pub struct MasterRef {
    speaker: Arc<dyn Speaker>,
    term: u64,
}

impl MasterRef {
    pub fn id(&self) -> &str {
        self.speaker.id()
    }

    pub fn address(&self) -> &str {
        self.speaker.address()
    }

    pub fn term(&self) -> u64 {
        self.term
    }
}

impl fmt::Debug for MasterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterRef")
            .field("id", &self.id())
            .field("address", &self.address())
            .field("term", &self.term)
            .finish()
    }
}

/// Notification payload: the new term and its master, if any
#[derive(Debug, Clone)]
pub struct MasterChange {
    pub term: u64,
    pub master: Option<MasterRef>,
}

/// Master change callbacks
pub trait MasterListener: Send + Sync {
    fn on_new_master(&self, change: &MasterChange);
}

struct ElectionState {
    term: u64,
    master: Option<MasterRef>,
}

/// Election coordinator over a speaker pool
pub struct MasterElection {
    pool: Arc<SpeakerPool>,
    strategy: ElectionStrategy,
    state: Mutex<ElectionState>,
    listeners: RwLock<Vec<Weak<dyn MasterListener>>>,
}

impl MasterElection {
    /// Create an election over the pool. If a speaker is already connected
    /// it is elected right away.
    pub fn new(pool: Arc<SpeakerPool>, strategy: ElectionStrategy) -> Arc<Self> {
        let election = Arc::new(Self {
            pool,
            strategy,
            state: Mutex::new(ElectionState { term: 0, master: None }),
            listeners: RwLock::new(Vec::new()),
        });

        let listener = Arc::downgrade(&election) as Weak<dyn PoolListener>;
        election.pool.add_listener(listener);

        let change = {
            let mut state = election.state.lock();
            election.fill_vacancy(&mut state)
        };
        if let Some(change) = change {
            election.notify(&change);
        }

        election
    }

    pub fn pool(&self) -> &Arc<SpeakerPool> {
        &self.pool
    }

    /// Current master, if any
    pub fn master(&self) -> Option<MasterRef> {
        self.state.lock().master.clone()
    }

    /// Current term
    pub fn term(&self) -> u64 {
        self.state.lock().term
    }

    /// Current term and master, read atomically
    pub fn current(&self) -> MasterChange {
        let state = self.state.lock();
        MasterChange {
            term: state.term,
            master: state.master.clone(),
        }
    }

    /// Register a listener. The election keeps only a weak reference.
    pub fn add_listener(&self, listener: Weak<dyn MasterListener>) {
        self.listeners.write().push(listener);
    }

    /// Send to whoever is master now. A no-op without a master.
    pub fn send_to_master(&self, envelope: Envelope) -> Result<()> {
        match self.master() {
            Some(master) => master.speaker.send(envelope),
            None => {
                tracing::trace!("No master, dropping {}", envelope.type_name());
                Ok(())
            }
        }
    }

    /// Send to the master of `term`, failing if the mastership moved on
    pub fn send_in_term(&self, term: u64, envelope: Envelope) -> Result<()> {
        let state = self.state.lock();
        if state.term != term {
            return Err(Error::StaleTerm {
                term,
                current: state.term,
            });
        }
        match &state.master {
            Some(master) => master.speaker.send(envelope),
            None => Err(Error::NoMaster),
        }
    }

    /// Pick a connected speaker, skipping `exclude`
    fn candidate(&self, exclude: Option<&str>) -> Option<Arc<dyn Speaker>> {
        let candidates: Vec<Arc<dyn Speaker>> = self
            .pool
            .connected()
            .into_iter()
            .filter(|s| Some(s.id()) != exclude)
            .collect();

        match self.strategy {
            ElectionStrategy::Ordered => candidates.into_iter().next(),
            ElectionStrategy::Random => candidates.choose(&mut rand::thread_rng()).cloned(),
        }
    }

    fn fill_vacancy(&self, state: &mut ElectionState) -> Option<MasterChange> {
        if state.master.is_some() {
            return None;
        }
        let speaker = self.candidate(None)?;
        Some(self.advance(state, Some(speaker)))
    }

    /// Open a new term with the given master
    fn advance(&self, state: &mut ElectionState, speaker: Option<Arc<dyn Speaker>>) -> MasterChange {
        state.term += 1;
        let term = state.term;
        state.master = speaker.map(|speaker| MasterRef { speaker, term });
        MasterChange {
            term,
            master: state.master.clone(),
        }
    }

    fn notify(&self, change: &MasterChange) {
        match &change.master {
            Some(master) => tracing::info!(
                "Elected {} as master (term {})",
                master.address(),
                change.term
            ),
            None => tracing::warn!("No master available (term {})", change.term),
        }

        let listeners: Vec<Arc<dyn MasterListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_new_master(change);
        }
    }
}

impl PoolListener for MasterElection {
    fn on_connected(&self, _speaker: &Arc<dyn Speaker>) {
        let change = {
            let mut state = self.state.lock();
            self.fill_vacancy(&mut state)
        };
        if let Some(change) = change {
            self.notify(&change);
        }
    }

    fn on_disconnected(&self, speaker: &Arc<dyn Speaker>) {
        let change = {
            let mut state = self.state.lock();
            match &state.master {
                Some(master) if master.id() == speaker.id() => {}
                _ => return,
            }
            tracing::info!("Master {} disconnected", speaker.address());
            let next = self.candidate(Some(speaker.id()));
            self.advance(&mut state, next)
        };
        self.notify(&change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Elements;
    use crate::replication::Message;
    use crate::speaker::MemorySpeaker;

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<(u64, Option<String>)>>,
    }

    impl MasterListener for Recorder {
        fn on_new_master(&self, change: &MasterChange) {
            self.changes
                .lock()
                .push((change.term, change.master.as_ref().map(|m| m.id().to_string())));
        }
    }

    fn subscribe(election: &MasterElection) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        let weak = Arc::downgrade(&recorder) as Weak<dyn MasterListener>;
        election.add_listener(weak);
        recorder
    }

    fn envelope() -> Envelope {
        Envelope::new("agent-1", 0, Message::Sync(Elements::default()))
    }

    #[test]
    fn test_master_is_sticky_and_fails_over() {
        let pool = SpeakerPool::new();
        let (a, _rx_a) = MemorySpeaker::new("a", &pool);
        let (b, _rx_b) = MemorySpeaker::new("b", &pool);
        let election = MasterElection::new(Arc::clone(&pool), ElectionStrategy::Ordered);
        let recorder = subscribe(&election);

        assert!(election.master().is_none());
        assert_eq!(election.term(), 0);

        b.connect();
        a.connect();
        // b stays master although a comes first in pool order
        assert_eq!(election.master().unwrap().id(), "b");

        b.disconnect();
        assert_eq!(election.master().unwrap().id(), "a");

        a.disconnect();
        assert!(election.master().is_none());

        assert_eq!(
            *recorder.changes.lock(),
            vec![
                (1, Some("b".to_string())),
                (2, Some("a".to_string())),
                (3, None),
            ]
        );
    }

    #[test]
    fn test_non_master_disconnect_is_ignored() {
        let pool = SpeakerPool::new();
        let (a, _rx_a) = MemorySpeaker::new("a", &pool);
        let (b, _rx_b) = MemorySpeaker::new("b", &pool);
        let election = MasterElection::new(Arc::clone(&pool), ElectionStrategy::Ordered);

        a.connect();
        b.connect();
        b.disconnect();

        assert_eq!(election.master().unwrap().id(), "a");
        assert_eq!(election.term(), 1);
    }

    #[test]
    fn test_elects_already_connected_speaker() {
        let pool = SpeakerPool::new();
        let (a, _rx_a) = MemorySpeaker::new("a", &pool);
        a.connect();

        let election = MasterElection::new(Arc::clone(&pool), ElectionStrategy::Random);
        let current = election.current();
        assert_eq!(current.term, 1);
        assert_eq!(current.master.unwrap().id(), "a");
    }

    #[test]
    fn test_random_strategy_picks_connected_speaker() {
        let pool = SpeakerPool::new();
        let (a, _rx_a) = MemorySpeaker::new("a", &pool);
        let (b, _rx_b) = MemorySpeaker::new("b", &pool);
        let (_c, _rx_c) = MemorySpeaker::new("c", &pool);
        a.connect();
        b.connect();

        let election = MasterElection::new(Arc::clone(&pool), ElectionStrategy::Random);
        let id = election.master().unwrap().id().to_string();
        assert!(id == "a" || id == "b");
    }

    #[test]
    fn test_send_in_term() {
        let pool = SpeakerPool::new();
        let (a, mut rx_a) = MemorySpeaker::new("a", &pool);
        let (b, mut rx_b) = MemorySpeaker::new("b", &pool);
        let election = MasterElection::new(Arc::clone(&pool), ElectionStrategy::Ordered);

        // No master: plain send is a no-op, term send fails
        election.send_to_master(envelope()).unwrap();
        assert!(matches!(
            election.send_in_term(0, envelope()),
            Err(Error::NoMaster)
        ));

        a.connect();
        b.connect();
        election.send_in_term(1, envelope()).unwrap();
        assert!(rx_a.try_recv().is_ok());

        a.disconnect();
        assert!(matches!(
            election.send_in_term(1, envelope()),
            Err(Error::StaleTerm { term: 1, current: 2 })
        ));
        election.send_to_master(envelope()).unwrap();
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }
}
