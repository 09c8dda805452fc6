use std::collections::HashSet;

use chrono::Utc;
use mongodb::{bson::doc, options::FindOptions};
use rocket::{futures::TryStreamExt, serde::json::Json, Route};

use crate::ballot_box::{compute_results, MongoBallotBox};
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        election::{ElectionDescription, ElectionSummary},
        pagination::{Paginated, Pagination},
        receipt::PublicReceipt,
        results::{ElectionResults, LedgerDump},
    },
    common::{
        election::{ElectionId, ElectionState},
        receipt::ReceiptHash,
    },
    db::{
        admin::Admin, election::Election, eligibility::Eligibility, vote::VoteRecord,
        voter::Voter,
    },
    mongodb::Coll,
};

use super::common::{election_by_id, published_election_by_id};

pub fn routes() -> Vec<Route> {
    routes![
        elections_admin,
        elections_voter,
        elections_anonymous,
        election_admin,
        election_voter,
        election_anonymous,
        election_results,
        election_receipts,
        election_receipt,
        election_dump,
    ]
}

#[get("/elections?<archived>", rank = 1)]
async fn elections_admin(
    _token: AuthToken<Admin>,
    archived: Option<bool>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionSummary>>> {
    let archived = archived.unwrap_or(false);
    summaries(elections, true, archived, |_| true).await
}

#[get("/elections?<archived>", rank = 2)]
async fn elections_voter(
    token: AuthToken<Voter>,
    archived: Option<bool>,
    elections: Coll<Election>,
    eligibility: Coll<Eligibility>,
) -> Result<Json<Vec<ElectionSummary>>> {
    let archived = archived.unwrap_or(false);
    let eligible_for: HashSet<ElectionId> = eligibility
        .find(doc! { "voter_id": token.id }, None)
        .await?
        .map_ok(|record| record.election_id)
        .try_collect()
        .await?;
    summaries(elections, false, archived, |election| {
        election.is_public() || eligible_for.contains(&election.id)
    })
    .await
}

#[get("/elections?<archived>", rank = 3)]
async fn elections_anonymous(
    archived: Option<bool>,
    elections: Coll<Election>,
) -> Result<Json<Vec<ElectionSummary>>> {
    let archived = archived.unwrap_or(false);
    summaries(elections, false, archived, |election| election.is_public()).await
}

#[get("/elections/<election_id>", rank = 1)]
async fn election_admin(
    _token: AuthToken<Admin>,
    election_id: ElectionId,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let election = election_by_id(&elections, election_id).await?;
    Ok(Json(election.into()))
}

#[get("/elections/<election_id>", rank = 2)]
async fn election_voter(
    token: AuthToken<Voter>,
    election_id: ElectionId,
    elections: Coll<Election>,
    eligibility: Coll<Eligibility>,
) -> Result<Json<ElectionDescription>> {
    let election = published_election_by_id(&elections, election_id).await?;
    if !election.is_public() {
        let filter = doc! {
            "voter_id": token.id,
            "election_id": election_id,
        };
        if eligibility.find_one(filter, None).await?.is_none() {
            return Err(Error::not_found(format!("Election with ID '{election_id}'")));
        }
    }
    Ok(Json(election.into()))
}

#[get("/elections/<election_id>", rank = 3)]
async fn election_anonymous(
    election_id: ElectionId,
    elections: Coll<Election>,
) -> Result<Json<ElectionDescription>> {
    let election = published_election_by_id(&elections, election_id).await?;
    if !election.is_public() {
        return Err(Error::not_found(format!("Election with ID '{election_id}'")));
    }
    Ok(Json(election.into()))
}

#[get("/elections/<election_id>/results")]
async fn election_results(
    election_id: ElectionId,
    elections: Coll<Election>,
    ballot_box: MongoBallotBox,
) -> Result<Json<ElectionResults>> {
    let election = published_election_by_id(&elections, election_id).await?;
    let results = compute_results(&ballot_box, &election, Utc::now()).await?;
    Ok(Json(results))
}

#[get("/elections/<election_id>/receipts")]
async fn election_receipts(
    election_id: ElectionId,
    pagination: Pagination,
    elections: Coll<Election>,
    votes: Coll<VoteRecord>,
) -> Result<Json<Paginated<PublicReceipt>>> {
    // Drafts cannot have votes, but they stay hidden all the same.
    published_election_by_id(&elections, election_id).await?;

    let filter = doc! {
        "election_id": election_id,
    };
    let options = FindOptions::builder()
        .sort(doc! { "cast_at": 1, "_id": 1 })
        .skip(pagination.skip())
        .limit(pagination.page_size() as i64)
        .build();
    let items: Vec<PublicReceipt> = votes
        .find(filter.clone(), options)
        .await?
        .map_ok(PublicReceipt::from)
        .try_collect()
        .await?;
    let total = votes.count_documents(filter, None).await? as usize;

    Ok(Json(Paginated {
        items,
        pagination: pagination.result(total),
    }))
}

#[get("/elections/<election_id>/receipts/<receipt_hash>")]
async fn election_receipt(
    election_id: ElectionId,
    receipt_hash: ReceiptHash,
    elections: Coll<Election>,
    votes: Coll<VoteRecord>,
) -> Result<Json<PublicReceipt>> {
    published_election_by_id(&elections, election_id).await?;

    let filter = doc! {
        "_id": receipt_hash.to_string(),
        "election_id": election_id,
    };
    let vote = votes
        .find_one(filter, None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Receipt {receipt_hash}")))?;
    Ok(Json(vote.into()))
}

#[get("/elections/<election_id>/dump")]
async fn election_dump(
    election_id: ElectionId,
    elections: Coll<Election>,
    ballot_box: MongoBallotBox,
) -> Result<Json<LedgerDump>> {
    let election = published_election_by_id(&elections, election_id).await?;
    let dump = ballot_box.ledger_dump(&election).await?;
    Ok(Json(dump))
}

/// Summaries of the elections visible to the caller, ordered by ID.
async fn summaries<F>(
    elections: Coll<Election>,
    include_drafts: bool,
    archived: bool,
    visible: F,
) -> Result<Json<Vec<ElectionSummary>>>
where
    F: Fn(&Election) -> bool,
{
    let filter = if archived {
        doc! { "state": ElectionState::Archived }
    } else if include_drafts {
        doc! { "state": { "$ne": ElectionState::Archived } }
    } else {
        doc! { "state": ElectionState::Published }
    };
    let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
    let all: Vec<Election> = elections.find(filter, options).await?.try_collect().await?;
    let summaries = all
        .into_iter()
        .filter(|election| visible(election))
        .map(ElectionSummary::from)
        .collect();
    Ok(Json(summaries))
}


#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{http::Status, local::asynchronous::Client, serde::json::serde_json};

    use crate::model::{
        api::{ballot::BallotSpec, election::ElectionSpec, receipt::Receipt},
        db::election::ElectionCore,
        common::election::Visibility,
        mongodb::{Counter, Id, ELECTION_ID_COUNTER_ID},
    };

    use super::*;

    #[backend_test(admin)]
    async fn admins_see_drafts(client: Client, db: Database) {
        insert_elections(&db).await;

        let response = client.get(uri!(elections_admin(Some(false)))).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let raw_response = response.into_string().await.unwrap();
        let fetched = serde_json::from_str::<Vec<ElectionSummary>>(&raw_response).unwrap();
        let titles: Vec<_> = fetched.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Student Council", "Budget Referendum", "Staff Ballot"]);
    }

    #[backend_test]
    async fn anonymous_callers_see_published_public_elections(client: Client, db: Database) {
        insert_elections(&db).await;

        let response = client.get(uri!(elections_anonymous(Some(false)))).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let raw_response = response.into_string().await.unwrap();
        let fetched = serde_json::from_str::<Vec<ElectionSummary>>(&raw_response).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].title, "Student Council");
        assert_eq!(fetched[0].visibility, Visibility::Public);
    }

    #[backend_test(voter)]
    async fn private_elections_need_eligibility_to_see(client: Client, db: Database) {
        let ids = insert_elections(&db).await;
        let private_id = ids[2];

        let response = client.get(uri!(election_voter(private_id))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());

        let voter = Coll::<Voter>::from_db(&db)
            .find_one(None, None)
            .await
            .unwrap()
            .unwrap();
        Coll::<Eligibility>::from_db(&db)
            .insert_one(Eligibility::new(voter.id, private_id), None)
            .await
            .unwrap();

        let response = client.get(uri!(election_voter(private_id))).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let response = client.get(uri!(elections_voter(Some(false)))).dispatch().await;
        let raw_response = response.into_string().await.unwrap();
        let fetched = serde_json::from_str::<Vec<ElectionSummary>>(&raw_response).unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[backend_test(voter)]
    async fn drafts_are_hidden_from_voters(client: Client, db: Database) {
        let ids = insert_elections(&db).await;

        let response = client.get(uri!(election_voter(ids[1]))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());

        let response = client.get(uri!(election_results(ids[1]))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(voter)]
    async fn cast_receipt_appears_on_the_bulletin(client: Client, db: Database) {
        let ids = insert_elections(&db).await;
        let election_id = ids[0];

        let response = client
            .post(format!("/voter/elections/{election_id}/cast"))
            .json(&BallotSpec {
                choices: vec!["Alice".to_string(), "Carol".to_string()],
                password: None,
            })
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let receipts: Vec<Receipt> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(receipts.len(), 2);

        // Page through the bulletin one receipt at a time.
        let response = client
            .get(format!("/elections/{election_id}/receipts?page_num=2&page_size=1"))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let page: Paginated<PublicReceipt> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.pagination.total, 2);

        let response = client
            .get(format!("/elections/{election_id}/receipts/{}", receipts[0].receipt_hash))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let public: PublicReceipt =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(public.candidate, receipts[0].candidate);

        let response = client.get(uri!(election_results(election_id))).dispatch().await;
        let results: ElectionResults =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(results.ballots_cast, 1);
        assert_eq!(results.total_votes, 2);
        assert_eq!(results.candidates[2].candidate, "Bob");

        let response = client.get(uri!(election_dump(election_id))).dispatch().await;
        let dump: LedgerDump =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        dump.verify().unwrap();
        for receipt in &receipts {
            dump.verify_receipt(receipt).unwrap();
        }
    }

    #[backend_test]
    async fn bad_pagination_is_rejected(client: Client, db: Database) {
        let ids = insert_elections(&db).await;
        for query in ["page_num=0", "page_size=0", &format!("page_num={}", usize::MAX)] {
            let response = client
                .get(format!("/elections/{}/receipts?{query}", ids[0]))
                .dispatch()
                .await;
            assert_eq!(Status::BadRequest, response.status(), "{query}");
        }
    }

    /// Insert a published public election, a draft, and a published private
    /// election, returning their IDs in that order.
    async fn insert_elections(db: &Database) -> Vec<ElectionId> {
        let counters = Coll::<Counter>::from_db(db);
        let elections = Coll::<Election>::from_db(db);
        let specs = [
            (ElectionSpec::current_example(), ElectionState::Published),
            (ElectionSpec::future_example(), ElectionState::Draft),
            (ElectionSpec::private_example(), ElectionState::Published),
        ];
        let mut ids = Vec::new();
        for (spec, state) in specs {
            let mut core: ElectionCore = spec.into_election(Id::new()).unwrap();
            core.state = state;
            let id = Counter::next(&counters, ELECTION_ID_COUNTER_ID).await.unwrap();
            elections.insert_one(Election::new(id, core), None).await.unwrap();
            ids.push(id);
        }
        ids
    }
}
