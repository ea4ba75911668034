use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use draw_core::{DrawConfig, DrawResult, EquitySummary, Participant, ParticipantId};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{StateStore, StorageError};

/// The one draw record shared by every member.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawState {
    pub optimal_draw: Option<DrawResult>,
    pub players_who_played: BTreeSet<ParticipantId>,
    pub is_initial_draw_done: bool,
    /// Milliseconds since the Unix epoch of the last successful draw.
    pub timestamp: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedRecipient {
    pub id: ParticipantId,
    pub name: String,
}

/// What one giver sees after the draw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub participant_id: ParticipantId,
    pub name: String,
    pub recipients: Vec<AssignedRecipient>,
    pub has_played: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("participant {0} not found")]
    UnknownParticipant(ParticipantId),
    #[error("draw has not been performed")]
    NotDrawn,
    #[error("participant {0} is not part of the current draw")]
    MissingFromDraw(ParticipantId),
}

/// Owns the draw record for one roster.
///
/// The record is read from the store on first use and cached. Every call
/// holds the same lock for the load and the mutation, and a mutation only
/// reaches the cache after the store accepted the whole new record.
pub struct DrawService {
    roster: Vec<Participant>,
    config: DrawConfig,
    store: Arc<dyn StateStore>,
    cached: Mutex<Option<DrawState>>,
}

impl DrawService {
    pub fn new(roster: Vec<Participant>, config: DrawConfig, store: Arc<dyn StateStore>) -> Self {
        Self {
            roster,
            config,
            store,
            cached: Mutex::new(None),
        }
    }

    pub fn roster(&self) -> &[Participant] {
        &self.roster
    }

    pub async fn state(&self) -> Result<DrawState, ServiceError> {
        let mut cached = self.cached.lock().await;
        Ok(self.current(&mut cached).await?)
    }

    /// Run the draw unless one is already in place. A roster the generator
    /// cannot serve leaves the record untouched.
    pub async fn perform_draw(&self, seed: Option<u64>) -> Result<DrawState, ServiceError> {
        let mut cached = self.cached.lock().await;
        let current = self.current(&mut cached).await?;
        if current.is_initial_draw_done {
            debug!("draw already done, returning stored result");
            return Ok(current);
        }

        let mut rng = seed
            .map(ChaCha8Rng::seed_from_u64)
            .unwrap_or_else(ChaCha8Rng::from_entropy);
        let draw = match draw_core::generate(&self.roster, &self.config, &mut rng) {
            Ok(draw) => draw,
            Err(err) => {
                warn!(error = %err, participants = self.roster.len(), "draw generation failed");
                return Ok(current);
            }
        };

        let next = DrawState {
            optimal_draw: Some(draw),
            is_initial_draw_done: true,
            timestamp: Some(now_millis()),
            ..current
        };
        let next = self.commit(&mut cached, next).await?;
        info!(
            participants = self.roster.len(),
            gifts_per_giver = self.config.gifts_per_giver,
            "draw performed"
        );
        Ok(next)
    }

    /// Record that a member has looked at their assignment. Ids are not
    /// checked against the roster.
    pub async fn mark_played(&self, participant_id: &str) -> Result<DrawState, ServiceError> {
        let mut cached = self.cached.lock().await;
        let mut next = self.current(&mut cached).await?;
        next.players_who_played.insert(participant_id.to_string());
        Ok(self.commit(&mut cached, next).await?)
    }

    pub async fn reset(&self) -> Result<DrawState, ServiceError> {
        let mut cached = self.cached.lock().await;
        self.current(&mut cached).await?;
        let next = self.commit(&mut cached, DrawState::default()).await?;
        info!("draw reset");
        Ok(next)
    }

    pub async fn assignments(&self, participant_id: &str) -> Result<Assignment, ServiceError> {
        let giver = self
            .find(participant_id)
            .ok_or_else(|| ServiceError::UnknownParticipant(participant_id.to_string()))?;
        let state = self.state().await?;
        let recipients = state
            .optimal_draw
            .as_ref()
            .ok_or(ServiceError::NotDrawn)?
            .get(participant_id)
            .cloned()
            .ok_or_else(|| ServiceError::MissingFromDraw(participant_id.to_string()))?;

        Ok(Assignment {
            participant_id: giver.id.clone(),
            name: giver.name.clone(),
            recipients: recipients
                .into_iter()
                .map(|id| AssignedRecipient {
                    name: self.find(&id).map(|p| p.name.clone()).unwrap_or_else(|| id.clone()),
                    id,
                })
                .collect(),
            has_played: state.players_who_played.contains(participant_id),
        })
    }

    pub async fn equity(&self) -> Result<EquitySummary, ServiceError> {
        let state = self.state().await?;
        Ok(draw_core::equity(state.optimal_draw.as_ref(), &self.roster))
    }

    fn find(&self, participant_id: &str) -> Option<&Participant> {
        self.roster.iter().find(|p| p.id == participant_id)
    }

    async fn current(&self, cached: &mut Option<DrawState>) -> Result<DrawState, StorageError> {
        if let Some(state) = cached.as_ref() {
            return Ok(state.clone());
        }
        let state = self.store.load().await?.unwrap_or_default();
        debug!(drawn = state.is_initial_draw_done, "draw state loaded");
        if let Some(draw) = &state.optimal_draw {
            if let Err(violation) = draw_core::verify(draw, &self.roster) {
                warn!(%violation, "stored draw does not match the current roster");
            }
        }
        *cached = Some(state.clone());
        Ok(state)
    }

    async fn commit(
        &self,
        cached: &mut Option<DrawState>,
        next: DrawState,
    ) -> Result<DrawState, StorageError> {
        self.store.save(&next).await?;
        *cached = Some(next.clone());
        Ok(next)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn roster(ids: &[&str]) -> Vec<Participant> {
        ids.iter().map(|id| Participant::new(*id, id.to_uppercase())).collect()
    }

    fn service(ids: &[&str]) -> DrawService {
        DrawService::new(roster(ids), DrawConfig::default(), Arc::new(MemoryStore::default()))
    }

    /// Counts calls and fails on demand.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
        loads: AtomicUsize,
    }

    impl FlakyStore {
        fn fail(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }

        fn outage(&self) -> Option<StorageError> {
            self.failing.load(Ordering::SeqCst).then(|| {
                StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            })
        }
    }

    impl StateStore for FlakyStore {
        fn load(&self) -> BoxFuture<'_, Result<Option<DrawState>, StorageError>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            match self.outage() {
                Some(err) => async move { Err::<Option<DrawState>, _>(err) }.boxed(),
                None => self.inner.load(),
            }
        }

        fn save<'a>(&'a self, state: &'a DrawState) -> BoxFuture<'a, Result<(), StorageError>> {
            match self.outage() {
                Some(err) => async move { Err::<(), _>(err) }.boxed(),
                None => self.inner.save(state),
            }
        }
    }

    #[tokio::test]
    async fn fresh_state_is_not_drawn() {
        let state = service(&["a", "b"]).state().await.unwrap();
        assert_eq!(state, DrawState::default());
    }

    #[tokio::test]
    async fn second_perform_keeps_first_result() {
        let svc = service(&["a", "b", "c", "d"]);
        let first = svc.perform_draw(Some(1)).await.unwrap();
        assert!(first.is_initial_draw_done);
        assert!(first.timestamp.is_some());

        let second = svc.perform_draw(Some(2)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn generator_failure_leaves_state_unchanged() {
        let svc = service(&["solo"]);
        let state = svc.perform_draw(None).await.unwrap();
        assert!(!state.is_initial_draw_done);
        assert!(state.optimal_draw.is_none());
        assert_eq!(svc.state().await.unwrap(), DrawState::default());
    }

    #[tokio::test]
    async fn mark_played_is_an_idempotent_add_without_roster_check() {
        let svc = service(&["a", "b"]);
        svc.mark_played("alice").await.unwrap();
        let state = svc.mark_played("alice").await.unwrap();
        assert_eq!(state.players_who_played.len(), 1);
        assert!(state.players_who_played.contains("alice"));
        assert!(!state.is_initial_draw_done);
    }

    #[tokio::test]
    async fn reset_clears_everything_and_allows_a_new_draw() {
        let svc = service(&["a", "b", "c"]);
        svc.perform_draw(None).await.unwrap();
        svc.mark_played("a").await.unwrap();

        let reset = svc.reset().await.unwrap();
        assert_eq!(reset, DrawState::default());
        assert_eq!(svc.state().await.unwrap(), DrawState::default());

        let redrawn = svc.perform_draw(None).await.unwrap();
        let draw = redrawn.optimal_draw.unwrap();
        assert_eq!(draw_core::verify(&draw, svc.roster()), Ok(()));
    }

    #[tokio::test]
    async fn state_is_loaded_once_and_read_from_existing_record() {
        let store = Arc::new(FlakyStore::default());
        let mut saved = DrawState::default();
        saved.players_who_played.insert("b".into());
        store.inner.save(&saved).await.unwrap();

        let svc = DrawService::new(roster(&["a", "b"]), DrawConfig::default(), store.clone());
        assert_eq!(svc.state().await.unwrap(), saved);
        svc.state().await.unwrap();
        svc.mark_played("a").await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_save_keeps_cache_and_retry_succeeds() {
        let store = Arc::new(FlakyStore::default());
        let svc = DrawService::new(roster(&["a", "b", "c"]), DrawConfig::default(), store.clone());
        svc.state().await.unwrap();

        store.fail(true);
        assert!(matches!(
            svc.perform_draw(None).await,
            Err(ServiceError::Storage(StorageError::Io(_)))
        ));
        store.fail(false);
        assert_eq!(svc.state().await.unwrap(), DrawState::default());

        let state = svc.perform_draw(None).await.unwrap();
        assert!(state.is_initial_draw_done);
        assert_eq!(store.inner.load().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn failed_load_is_a_storage_error() {
        let store = Arc::new(FlakyStore::default());
        store.fail(true);
        let svc = DrawService::new(roster(&["a", "b"]), DrawConfig::default(), store.clone());
        assert!(matches!(svc.state().await, Err(ServiceError::Storage(_))));

        store.fail(false);
        assert_eq!(svc.state().await.unwrap(), DrawState::default());
    }

    #[tokio::test]
    async fn assignments_resolve_names_and_played_flag() {
        let svc = service(&["a", "b"]);
        assert!(matches!(svc.assignments("a").await, Err(ServiceError::NotDrawn)));
        assert!(matches!(
            svc.assignments("zed").await,
            Err(ServiceError::UnknownParticipant(id)) if id == "zed"
        ));

        svc.perform_draw(None).await.unwrap();
        svc.mark_played("a").await.unwrap();
        let assignment = svc.assignments("a").await.unwrap();
        assert_eq!(assignment.name, "A");
        assert!(assignment.has_played);
        assert_eq!(
            assignment.recipients,
            vec![AssignedRecipient {
                id: "b".into(),
                name: "B".into()
            }]
        );
        assert!(!svc.assignments("b").await.unwrap().has_played);
    }

    #[tokio::test]
    async fn equity_is_flat_after_a_draw() {
        let svc = DrawService::new(
            roster(&["a", "b", "c", "d", "e"]),
            DrawConfig {
                gifts_per_giver: 2,
                ..DrawConfig::default()
            },
            Arc::new(MemoryStore::default()),
        );
        assert_eq!(svc.equity().await.unwrap().max, 0);

        svc.perform_draw(Some(9)).await.unwrap();
        let summary = svc.equity().await.unwrap();
        assert_eq!((summary.min, summary.max, summary.spread), (2, 2, 0));
    }
}
