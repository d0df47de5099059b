use crate::{
    admission::{Gate, Limit, WindowStore},
    config::{EngineConfig, RetryPolicy},
    db::{self, Db},
    error::{Error, Result},
    item::{ItemId, UserId, Vote},
    rating,
};

/// Endpoint name under which vote submissions are rate limited.
pub const VOTE_ENDPOINT: &str = "vote";

/// Applies comparison outcomes to item ratings.
///
/// Each vote reads both items, computes their new ratings, writes both rows and appends to the
/// vote ledger in a single transaction. Item writes are version-checked, so two votes that share
/// an item can never both build on the same stale rating: the loser of that race rolls back and
/// is retried against the fresh row. Votes on disjoint items do not contend with each other.
#[derive(Clone, Debug)]
pub struct VotingEngine {
    db: Db,
    retry: RetryPolicy,
    limit: Limit,
}

impl VotingEngine {
    pub fn new(db: Db, config: &EngineConfig) -> Self {
        Self {
            db,
            retry: config.retry,
            limit: config.vote_limit,
        }
    }

    /// Record that `winner` was preferred over `loser`.
    pub async fn record_vote(
        &self,
        winner: ItemId,
        loser: ItemId,
        voter: Option<UserId>,
    ) -> Result<Vote> {
        let vote = self
            .retry
            .run("vote", || self.try_record_vote(winner, loser, voter))
            .await?;
        tracing::debug!(id = %vote.id, %winner, %loser, ?voter, "recorded vote");
        Ok(vote)
    }

    /// Like [`record_vote`](Self::record_vote), but only once `gate` admits `client`.
    pub async fn submit_vote<S: WindowStore>(
        &self,
        gate: &Gate<S>,
        client: &str,
        winner: ItemId,
        loser: ItemId,
        voter: Option<UserId>,
    ) -> Result<Vote> {
        gate.admit(VOTE_ENDPOINT, client, self.limit).await?;
        self.record_vote(winner, loser, voter).await
    }

    async fn try_record_vote(
        &self,
        winner_id: ItemId,
        loser_id: ItemId,
        voter: Option<UserId>,
    ) -> Result<Vote> {
        let mut tx = self.db.begin().await?;

        let winner = db::get_item(&mut tx, winner_id).await?;
        let loser = db::get_item(&mut tx, loser_id).await?;
        if winner_id == loser_id {
            return Err(Error::InvalidArgument(format!(
                "item {winner_id} cannot be voted against itself"
            )));
        }

        let (winner_rating, loser_rating) = rating::update(winner.rating, loser.rating);
        db::apply_rating_update(&mut tx, &winner, winner_rating, true).await?;
        db::apply_rating_update(&mut tx, &loser, loser_rating, false).await?;
        let vote = db::append_vote(&mut tx, winner_id, loser_id, voter).await?;

        tx.commit().await?;
        Ok(vote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        admission::MemoryStore,
        item::{Gender, Item, Kind, NewItem},
    };
    use std::time::Duration;

    async fn setup(n: usize) -> (Db, VotingEngine, Vec<Item>) {
        let db = Db::memory().await.unwrap();
        let mut items = vec![];
        for i in 0..n {
            items.push(
                db.create_item(
                    NewItem::new(Kind::Real, Gender::Female, format!("https://img/{i}.jpg"))
                        .approved(),
                )
                .await
                .unwrap(),
            );
        }
        let engine = VotingEngine::new(db.clone(), &Default::default());
        (db, engine, items)
    }

    #[tokio::test]
    async fn vote_updates_ratings_and_counters() {
        let (db, engine, items) = setup(2).await;
        let (a, b) = (items[0].id, items[1].id);

        let vote = engine.record_vote(a, b, Some(9.into())).await.unwrap();
        assert_eq!(vote.winner, a);
        assert_eq!(vote.loser, b);
        assert_eq!(vote.voter, Some(9.into()));

        let a = db.item(a).await.unwrap();
        let b = db.item(b).await.unwrap();
        assert_eq!((a.rating, b.rating), (1216, 1184));
        assert_eq!((a.times_judged, a.times_won), (1, 1));
        assert_eq!((b.times_judged, b.times_won), (1, 0));
        assert_eq!(db.vote_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn successive_votes_build_on_each_other() {
        let (db, engine, items) = setup(3).await;
        let (x, a, b) = (items[0].id, items[1].id, items[2].id);

        engine.record_vote(x, a, None).await.unwrap();
        engine.record_vote(x, b, None).await.unwrap();

        let x = db.item(x).await.unwrap();
        assert_eq!(x.rating, 1231);
        assert_eq!((x.times_judged, x.times_won), (2, 2));
    }

    #[tokio::test]
    async fn self_vote_is_rejected_without_effects() {
        let (db, engine, items) = setup(1).await;
        let a = items[0].id;

        let err = engine.record_vote(a, a, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");

        assert_eq!(db.item(a).await.unwrap(), items[0]);
        assert_eq!(db.vote_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_item_has_no_effects() {
        let (db, engine, items) = setup(1).await;
        let a = items[0].id;

        let err = engine.record_vote(a, 99.into(), None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "{err}");
        let err = engine.record_vote(99.into(), a, None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "{err}");

        assert_eq!(db.item(a).await.unwrap(), items[0]);
        assert_eq!(db.vote_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_votes_are_serialized() {
        let (db, engine, items) = setup(3).await;
        let (x, a, b) = (items[0].id, items[1].id, items[2].id);

        let (first, second) = tokio::join!(
            engine.record_vote(x, a, None),
            engine.record_vote(x, b, None),
        );
        first.unwrap();
        second.unwrap();

        let x = db.item(x).await.unwrap();
        assert_eq!(x.rating, 1231);
        assert_eq!(x.times_judged, 2);
    }

    #[tokio::test]
    async fn submission_is_rate_limited() {
        let (db, _, items) = setup(2).await;
        let (a, b) = (items[0].id, items[1].id);
        let gate = Gate::new(MemoryStore::default());
        let engine = VotingEngine::new(
            db.clone(),
            &EngineConfig {
                vote_limit: Limit::new(2, Duration::from_secs(10)),
                ..Default::default()
            },
        );

        for _ in 0..2 {
            engine
                .submit_vote(&gate, "10.0.0.1", a, b, None)
                .await
                .unwrap();
        }
        let err = engine
            .submit_vote(&gate, "10.0.0.1", a, b, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { times: 2, .. }), "{err}");
        assert_eq!(db.vote_count().await.unwrap(), 2);

        // Other clients are unaffected.
        engine
            .submit_vote(&gate, "10.0.0.2", a, b, None)
            .await
            .unwrap();
    }
}
