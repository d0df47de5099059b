use faceoff_core::{
    config::{EngineConfig, RetryPolicy},
    db::Db,
    item::{Gender, ItemId, Kind, NewItem},
    rating,
    vote::VotingEngine,
};
use futures::future::join_all;
use std::time::Duration;
use tempfile::tempdir;

fn engine_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy::new(64, Duration::from_millis(1)),
        ..Default::default()
    }
}

async fn items(db: &Db, n: usize) -> Vec<ItemId> {
    let mut ids = vec![];
    for i in 0..n {
        let item = db
            .create_item(
                NewItem::new(Kind::Real, Gender::Female, format!("https://img/{i}.jpg")).approved(),
            )
            .await
            .unwrap();
        ids.push(item.id);
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_item_votes_apply_in_sequence() {
    let dir = tempdir().unwrap();
    let db = Db::open(&dir.path().join("faceoff.sqlite")).await.unwrap();
    let ids = items(&db, 9).await;
    let (x, opponents) = (ids[0], &ids[1..]);
    let engine = VotingEngine::new(db.clone(), &engine_config());

    // X beats every opponent, all at once.
    let votes = opponents.iter().map(|&loser| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.record_vote(x, loser, None).await })
    });
    for res in join_all(votes).await {
        res.unwrap().unwrap();
    }

    // Every opponent started at the baseline and was judged once, so whatever order the votes
    // committed in, X's rating is the result of applying them one after another.
    let expected = opponents
        .iter()
        .fold(rating::BASELINE, |x, _| rating::update(x, rating::BASELINE).0);
    let x = db.item(x).await.unwrap();
    assert_eq!(x.rating, expected);
    assert_eq!(x.times_judged, opponents.len() as i64);
    assert_eq!(x.times_won, opponents.len() as i64);
    for &id in opponents {
        let item = db.item(id).await.unwrap();
        assert_eq!(item.rating, 1184);
        assert_eq!((item.times_judged, item.times_won), (1, 0));
    }
    assert_eq!(db.vote_count().await.unwrap(), opponents.len() as i64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_votes_are_independent() {
    let dir = tempdir().unwrap();
    let db = Db::open(&dir.path().join("faceoff.sqlite")).await.unwrap();
    let ids = items(&db, 8).await;
    let engine = VotingEngine::new(db.clone(), &engine_config());

    let votes = ids.chunks(2).map(|pair| {
        let (winner, loser) = (pair[0], pair[1]);
        let engine = engine.clone();
        tokio::spawn(async move { engine.record_vote(winner, loser, None).await })
    });
    for res in join_all(votes).await {
        res.unwrap().unwrap();
    }

    for pair in ids.chunks(2) {
        assert_eq!(db.item(pair[0]).await.unwrap().rating, 1216);
        assert_eq!(db.item(pair[1]).await.unwrap().rating, 1184);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_on_one_item_with_default_retries() {
    let dir = tempdir().unwrap();
    let db = Db::open(&dir.path().join("faceoff.sqlite")).await.unwrap();
    let ids = items(&db, 33).await;
    let (x, opponents) = (ids[0], &ids[1..]);
    let engine = VotingEngine::new(db.clone(), &EngineConfig::default());

    let votes = opponents.iter().map(|&loser| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.record_vote(x, loser, None).await })
    });
    for res in join_all(votes).await {
        res.unwrap().unwrap();
    }

    let expected = opponents
        .iter()
        .fold(rating::BASELINE, |x, _| rating::update(x, rating::BASELINE).0);
    let x = db.item(x).await.unwrap();
    assert_eq!(x.rating, expected);
    assert_eq!(x.times_judged, opponents.len() as i64);
    assert_eq!(db.vote_count().await.unwrap(), opponents.len() as i64);
}
