use crate::{
    db::Db,
    error::{Error, Result},
    item::{Filter, Item, ItemId, UserId},
};
use rand::{seq::SliceRandom, Rng};
use std::collections::HashSet;

/// Picks the two items shown in a comparison.
#[derive(Clone, Debug)]
pub struct PairSampler {
    db: Db,
}

impl PairSampler {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Two distinct eligible items matching `filter`, chosen uniformly at random.
    ///
    /// If `viewer` is given, items they have already voted on (either way) are skipped. When that
    /// leaves fewer than two items but the filter alone would have matched enough, the result is
    /// [`Error::Exhausted`] rather than [`Error::InsufficientPool`].
    pub async fn pair(&self, filter: &Filter, viewer: Option<UserId>) -> Result<(Item, Item)> {
        let pool = self.db.eligible(filter).await?;
        let judged = match viewer {
            Some(viewer) if pool.len() >= 2 => self.db.judged_by(viewer).await?,
            _ => HashSet::new(),
        };
        choose_pair(pool, &judged, &mut rand::thread_rng())
    }
}

/// Pick two distinct items from `pool`, skipping anything in `judged`.
pub fn choose_pair<R: Rng + ?Sized>(
    pool: Vec<Item>,
    judged: &HashSet<ItemId>,
    rng: &mut R,
) -> Result<(Item, Item)> {
    if pool.len() < 2 {
        return Err(Error::InsufficientPool);
    }
    let fresh: Vec<Item> = pool
        .into_iter()
        .filter(|item| !judged.contains(&item.id))
        .collect();

    let mut chosen = fresh.choose_multiple(rng, 2).cloned();
    match (chosen.next(), chosen.next()) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(Error::Exhausted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        item::{Gender, Kind, NewItem},
        vote::VotingEngine,
    };
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashMap;

    async fn setup(n: usize) -> (Db, Vec<Item>) {
        let db = Db::memory().await.unwrap();
        let mut items = vec![];
        for i in 0..n {
            items.push(
                db.create_item(
                    NewItem::new(Kind::Ai, Gender::Male, format!("https://img/{i}.jpg")).approved(),
                )
                .await
                .unwrap(),
            );
        }
        (db, items)
    }

    #[tokio::test]
    async fn pair_is_distinct_and_eligible() {
        let (db, items) = setup(5).await;
        db.deactivate(items[0].id).await.unwrap();
        db.set_approved(items[1].id, false).await.unwrap();

        let sampler = PairSampler::new(db);
        for _ in 0..20 {
            let (a, b) = sampler.pair(&Filter::kind(Kind::Ai), None).await.unwrap();
            assert_ne!(a.id, b.id);
            assert!(a.is_eligible() && b.is_eligible());
            assert!(![items[0].id, items[1].id].contains(&a.id));
            assert!(![items[0].id, items[1].id].contains(&b.id));
        }
    }

    #[tokio::test]
    async fn insufficient_pool() {
        let (db, _) = setup(1).await;
        let sampler = PairSampler::new(db);
        assert!(matches!(
            sampler.pair(&Filter::kind(Kind::Ai), None).await,
            Err(Error::InsufficientPool)
        ));
        // A viewer does not turn a small pool into exhaustion.
        assert!(matches!(
            sampler.pair(&Filter::kind(Kind::Ai), Some(1.into())).await,
            Err(Error::InsufficientPool)
        ));
        assert!(matches!(
            sampler.pair(&Filter::kind(Kind::Real), None).await,
            Err(Error::InsufficientPool)
        ));
    }

    #[tokio::test]
    async fn judged_items_are_excluded() {
        let (db, items) = setup(4).await;
        let engine = VotingEngine::new(db.clone(), &EngineConfig::default());
        let sampler = PairSampler::new(db);
        let viewer = UserId::from(7);
        let filter = Filter::kind(Kind::Ai);

        engine
            .record_vote(items[0].id, items[1].id, Some(viewer))
            .await
            .unwrap();
        for _ in 0..20 {
            let (a, b) = sampler.pair(&filter, Some(viewer)).await.unwrap();
            let mut ids = [a.id, b.id];
            ids.sort();
            assert_eq!(ids, [items[2].id, items[3].id]);
        }

        // Someone else still sees everything.
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let (a, b) = sampler.pair(&filter, Some(8.into())).await.unwrap();
            seen.extend([a.id, b.id]);
        }
        assert_eq!(seen.len(), 4);

        engine
            .record_vote(items[3].id, items[2].id, Some(viewer))
            .await
            .unwrap();
        assert!(matches!(
            sampler.pair(&filter, Some(viewer)).await,
            Err(Error::Exhausted)
        ));
        // Anonymous requests are never exhausted.
        sampler.pair(&filter, None).await.unwrap();
    }

    fn item(id: i64) -> Item {
        Item {
            id: id.into(),
            kind: Kind::Real,
            gender: Gender::Female,
            category: None,
            owner: None,
            image_url: String::new(),
            rating: 1200,
            times_judged: 0,
            times_won: 0,
            active: true,
            approved: true,
            version: 0,
            created_at: Default::default(),
        }
    }

    #[test]
    fn one_fresh_item_is_exhaustion() {
        let pool = (1..=3).map(item).collect::<Vec<_>>();
        let judged = HashSet::from([ItemId::from(1), ItemId::from(2)]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            choose_pair(pool, &judged, &mut rng),
            Err(Error::Exhausted)
        ));
    }

    #[test]
    fn choice_is_roughly_uniform() {
        let pool = (1..=4).map(item).collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(1234);
        let mut counts = HashMap::<ItemId, usize>::new();
        for _ in 0..4000 {
            let (a, b) = choose_pair(pool.clone(), &HashSet::new(), &mut rng).unwrap();
            assert_ne!(a.id, b.id);
            *counts.entry(a.id).or_default() += 1;
            *counts.entry(b.id).or_default() += 1;
        }
        // Each item should appear in about half of all pairs.
        for (id, count) in counts {
            assert!((1700..2300).contains(&count), "{id}: {count}");
        }
    }
}
