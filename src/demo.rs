//! Demo data for trying out a deployment: seeded voters, public elections,
//! and ballots cast through the normal casting path, plus their removal.

use chrono::{Duration, Utc};
use mongodb::{
    bson::{doc, Regex},
    Client, Database,
};
use rand::{seq::SliceRandom, Rng};
use rocket::futures::TryStreamExt;

use crate::ballot_box::{cast_ballot, MongoBallotBox};
use crate::config::Config;
use crate::error::Result;
use crate::model::{
    api::ballot::BallotSpec,
    common::{
        demographic::{AgeGroup, Demographic, Gender},
        election::{ElectionId, ElectionState, Visibility},
        password::hash_password,
    },
    db::{
        admin::Admin,
        election::{Election, ElectionCore},
        eligibility::Eligibility,
        invitation::Invitation,
        participation::ParticipationMarker,
        vote::VoteRecord,
        voter::{NewVoter, Voter},
    },
    mongodb::{
        ensure_election_id_counter_exists, ensure_indexes_exist, Coll, Counter, Id,
        ELECTION_ID_COUNTER_ID,
    },
};

/// Prefix of every demo voter's username.
pub const DEMO_USERNAME_PREFIX: &str = "demo_user";

/// Password shared by every demo voter.
pub const DEMO_PASSWORD: &str = "demo1234!";

const COUNTRIES: [&str; 8] = [
    "Greece", "Cyprus", "Italy", "Spain", "Portugal", "Malta", "France", "Germany",
];

/// How much demo data to create.
#[derive(Debug, Clone, Copy)]
pub struct DemoSize {
    pub users: usize,
    pub elections: usize,
    pub candidates: usize,
}

impl Default for DemoSize {
    fn default() -> Self {
        Self {
            users: 120,
            elections: 3,
            candidates: 6,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub voters: usize,
    pub elections: Vec<ElectionId>,
    pub votes: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub elections: u64,
    pub votes: u64,
    pub markers: u64,
    pub voters: u64,
}

/// Seed demo voters and open public elections, then have every demo voter
/// cast a random ballot in every new election.
pub async fn seed(client: &Client, db: &Database, size: DemoSize, config: &Config) -> Result<SeedSummary> {
    ensure_indexes_exist(db).await?;
    let counters = Coll::<Counter>::from_db(db);
    ensure_election_id_counter_exists(&counters).await?;

    let voters = demo_voters(db, size.users).await?;
    info!("{} demo voter(s) ready", voters.len());

    let created_by = Coll::<Admin>::from_db(db)
        .find_one(None, None)
        .await?
        .map_or_else(Id::new, |admin| admin.id);
    let elections_coll = Coll::<Election>::from_db(db);
    let now = Utc::now();
    let mut elections = Vec::with_capacity(size.elections);
    for i in 1..=size.elections {
        let candidates: Vec<String> = (1..=size.candidates.max(1))
            .map(|k| format!("Candidate {k}"))
            .collect();
        let max_choices = rand::thread_rng().gen_range(1..=3).min(candidates.len()) as u16;
        let id = Counter::next(&counters, ELECTION_ID_COUNTER_ID).await?;
        let election = Election::new(
            id,
            ElectionCore {
                title: format!("Demo Election #{i}"),
                description: "Generated demo data".to_string(),
                state: ElectionState::Published,
                visibility: Visibility::Public,
                opens_at: now,
                closes_at: now + Duration::days(1),
                candidates,
                max_choices,
                groups: Vec::new(),
                password_hash: None,
                created_by,
                demo: true,
            },
        );
        elections_coll.insert_one(&election, None).await?;
        elections.push(election);
    }

    let ballot_box = MongoBallotBox::new(client.clone(), db.clone());
    let mut votes = 0;
    for election in &elections {
        for voter in &voters {
            let ballot = random_ballot(election);
            votes += cast_ballot(&ballot_box, voter, election.id, ballot, Utc::now(), config)
                .await?
                .len();
        }
        debug!("Seeded ballots for demo election {}", election.id);
    }

    let summary = SeedSummary {
        voters: voters.len(),
        elections: elections.iter().map(|e| e.id).collect(),
        votes,
    };
    info!(
        "Seeded {} voter(s), {} election(s), {} vote(s)",
        summary.voters,
        summary.elections.len(),
        summary.votes
    );
    Ok(summary)
}

/// Remove demo elections with everything recorded against them, and the demo voters.
pub async fn purge(db: &Database) -> Result<PurgeSummary> {
    let elections = Coll::<Election>::from_db(db);
    let ids: Vec<ElectionId> = elections
        .find(doc! { "demo": true }, None)
        .await?
        .map_ok(|election| election.id)
        .try_collect()
        .await?;

    let in_demo = doc! { "election_id": { "$in": ids.clone() } };
    let votes = Coll::<VoteRecord>::from_db(db)
        .delete_many(in_demo.clone(), None)
        .await?
        .deleted_count;
    let markers = Coll::<ParticipationMarker>::from_db(db)
        .delete_many(
            ParticipationMarker::election_filter(doc! { "$in": ids.clone() }),
            None,
        )
        .await?
        .deleted_count;
    Coll::<Eligibility>::from_db(db)
        .delete_many(in_demo.clone(), None)
        .await?;
    Coll::<Invitation>::from_db(db)
        .delete_many(in_demo, None)
        .await?;
    let deleted_elections = elections
        .delete_many(doc! { "demo": true }, None)
        .await?
        .deleted_count;

    let demo_voters = doc! {
        "username": Regex {
            pattern: format!("^{DEMO_USERNAME_PREFIX}"),
            options: String::new(),
        },
    };
    let voters = Coll::<Voter>::from_db(db)
        .delete_many(demo_voters, None)
        .await?
        .deleted_count;

    let summary = PurgeSummary {
        elections: deleted_elections,
        votes,
        markers,
        voters,
    };
    info!("Purged demo data: {summary:?}");
    Ok(summary)
}

/// Load or create the demo voters `demo_user0..count`.
async fn demo_voters(db: &Database, count: usize) -> Result<Vec<Voter>> {
    let voters = Coll::<Voter>::from_db(db);
    let new_voters = Coll::<NewVoter>::from_db(db);
    // One hash for everyone keeps seeding fast.
    let password_hash = hash_password(DEMO_PASSWORD)?;

    let mut seeded = Vec::with_capacity(count);
    for i in 0..count {
        let username = format!("{DEMO_USERNAME_PREFIX}{i}");
        if let Some(voter) = voters.find_one(doc! { "username": &username }, None).await? {
            seeded.push(voter);
            continue;
        }

        let new_voter = NewVoter {
            email: Some(format!("{username}@example.com")),
            username,
            password_hash: password_hash.clone(),
            demographic: random_demographic(),
            region: None,
        };
        let inserted = new_voters.insert_one(&new_voter, None).await?;
        if let Some(id) = inserted.inserted_id.as_object_id() {
            seeded.push(Voter {
                id: id.into(),
                voter: new_voter,
            });
        }
    }
    Ok(seeded)
}

fn random_demographic() -> Demographic {
    let mut rng = rand::thread_rng();
    Demographic {
        gender: *Gender::ALL.choose(&mut rng).unwrap_or(&Gender::Unknown),
        age_group: *AgeGroup::ALL.choose(&mut rng).unwrap_or(&AgeGroup::Unknown),
        country: COUNTRIES.choose(&mut rng).unwrap_or(&"Unknown").to_string(),
    }
}

/// Between one and `max_choices` distinct candidates, chosen uniformly.
fn random_ballot(election: &Election) -> BallotSpec {
    let mut rng = rand::thread_rng();
    let k = rng.gen_range(1..=usize::from(election.max_choices).max(1));
    BallotSpec {
        choices: election
            .candidates
            .choose_multiple(&mut rng, k)
            .cloned()
            .collect(),
        password: None,
    }
}
