//! Operator tool for eBallot: seed or purge demo data, and verify published
//! ledger dumps and voter receipts offline.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;
use serde::de::DeserializeOwned;

use eballot_backend::{
    demo::{self, DemoSize},
    model::api::{
        receipt::Receipt,
        results::{LedgerDump, VerificationError},
    },
    Config,
};

const PROGRAM_NAME: &str = "eballot-cli";

const ABOUT_TEXT: &str = "Operator tool for the eBallot backend.

EXIT CODES:
     0: Success.
   255: Ran successfully, but verification failed.
     1: Error.";

const DUMP_PATH: &str = "DUMP_PATH";
const RECEIPT: &str = "receipt";
const USERS: &str = "users";
const ELECTIONS: &str = "elections";
const CANDIDATES: &str = "candidates";
const DB_URI: &str = "db-uri";
const DB_NAME: &str = "db-name";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    let db_args = [
        Arg::new(DB_URI)
            .long(DB_URI)
            .env("ROCKET_DB_URI")
            .help("MongoDB connection string")
            .required(true),
        Arg::new(DB_NAME)
            .long(DB_NAME)
            .env("ROCKET_DB_NAME")
            .default_value("eballot")
            .help("Database name"),
    ];

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .subcommand(
            Command::new("demo")
                .about("Seed demo voters and public elections, and cast random ballots")
                .arg(
                    Arg::new(USERS)
                        .long(USERS)
                        .value_parser(value_parser!(usize))
                        .default_value("120"),
                )
                .arg(
                    Arg::new(ELECTIONS)
                        .long(ELECTIONS)
                        .value_parser(value_parser!(usize))
                        .default_value("3"),
                )
                .arg(
                    Arg::new(CANDIDATES)
                        .long(CANDIDATES)
                        .value_parser(value_parser!(usize))
                        .default_value("6"),
                )
                .args(db_args.clone()),
        )
        .subcommand(
            Command::new("purge")
                .about("Remove demo elections, their ledgers, and demo voters")
                .args(db_args),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a ledger dump, and optionally a receipt against it")
                .arg(
                    Arg::new(DUMP_PATH)
                        .help("The path to a JSON dump, as returned by `GET /elections/<election_id>/dump`")
                        .action(ArgAction::Set)
                        .required(true),
                )
                .arg(
                    Arg::new(RECEIPT)
                        .long(RECEIPT)
                        .help("The path to a JSON receipt, as returned when casting")
                        .action(ArgAction::Set),
                ),
        )
}

/// Errors that this program may produce.
#[derive(Debug, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode a JSON file.
    Format(String),
    /// The database or configuration could not be used.
    Backend(String),
    /// Verification failed due to the contained reason.
    Verification(VerificationError),
}

fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, Error> {
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))
}

/// Verify a dump, and a receipt against it if given.
fn verify(dump_path: &str, receipt_path: Option<&String>) -> Result<LedgerDump, Error> {
    let dump: LedgerDump = load(dump_path)?;
    dump.verify().map_err(Error::Verification)?;
    if let Some(path) = receipt_path {
        let receipt: Receipt = load(path)?;
        dump.verify_receipt(&receipt).map_err(Error::Verification)?;
    }
    Ok(dump)
}

async fn connect(args: &ArgMatches) -> Result<(mongodb::Client, mongodb::Database), Error> {
    // Required or defaulted arguments are guaranteed to be present.
    let uri: &String = args.get_one(DB_URI).unwrap();
    let name: &String = args.get_one(DB_NAME).unwrap();
    let client = mongodb::Client::with_uri_str(uri)
        .await
        .map_err(|e| Error::Backend(e.to_string()))?;
    let db = client.database(name);
    Ok((client, db))
}

async fn run_demo(args: &ArgMatches) -> Result<(), Error> {
    // Receipts are signed with the server's key, so read it from the same config.
    let config: Config = rocket::Config::figment()
        .extract()
        .map_err(|e| Error::Backend(e.to_string()))?;
    let size = DemoSize {
        users: *args.get_one(USERS).unwrap(),
        elections: *args.get_one(ELECTIONS).unwrap(),
        candidates: *args.get_one(CANDIDATES).unwrap(),
    };
    let (client, db) = connect(args).await?;
    let summary = demo::seed(&client, &db, size, &config)
        .await
        .map_err(|e| Error::Backend(e.to_string()))?;
    println!(
        "Seeded {} voters, {} elections ({:?}), {} votes.",
        summary.voters,
        summary.elections.len(),
        summary.elections,
        summary.votes
    );
    Ok(())
}

async fn run_purge(args: &ArgMatches) -> Result<(), Error> {
    let (_client, db) = connect(args).await?;
    let summary = demo::purge(&db)
        .await
        .map_err(|e| Error::Backend(e.to_string()))?;
    println!("Purged demo data:");
    println!("  Elections: {}", summary.elections);
    println!("  Votes:     {}", summary.votes);
    println!("  Markers:   {}", summary.markers);
    println!("  Voters:    {}", summary.voters);
    Ok(())
}

/// Run the chosen subcommand, report the result, and return the exit code.
async fn run(args: &ArgMatches) -> u8 {
    let result = match args.subcommand() {
        Some(("demo", sub)) => run_demo(sub).await,
        Some(("purge", sub)) => run_purge(sub).await,
        Some(("verify", sub)) => {
            let path: &String = sub.get_one(DUMP_PATH).unwrap(); // Required argument is guaranteed to be present.
            verify(path, sub.get_one(RECEIPT)).map(|dump| {
                println!("Verification succeeded.");
                println!("{} (election {})", dump.title, dump.election_id);
                println!("{} ballots, {} votes", dump.ballots_cast, dump.tally.total_votes);
                for row in &dump.tally.candidates {
                    println!("{}: {} vote{}", row.candidate, row.votes, if row.votes != 1 { "s" } else { "" });
                }
            })
        }
        _ => unreachable!("a subcommand is required"),
    };

    match result {
        Ok(()) => 0,
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {msg}");
            1
        }
        Err(Error::Backend(msg)) => {
            println!("Error: {msg}");
            1
        }
        Err(Error::Verification(err)) => {
            println!("Verification failed: {err}");
            255
        }
    }
}

#[rocket::main]
async fn main() {
    if let Err(e) = log4rs::init_file("log4rs.yaml", Default::default()) {
        eprintln!("Logging disabled: {e}");
    }
    let args = cli().get_matches();
    let exit_code = run(&args).await;
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification() {
        let dump = verify("example_dumps/election.json", None).unwrap();
        assert_eq!(dump.ballots_cast, 3);
        assert_eq!(dump.tally.candidates[0].candidate, "Alice");

        assert!(verify("example_dumps/election.json", Some(&"example_dumps/receipt.json".to_string())).is_ok());

        assert_eq!(
            verify("example_dumps/election_invalid_tally.json", None).unwrap_err(),
            Error::Verification(VerificationError::TallyMismatch)
        );
        assert!(matches!(
            verify("example_dumps/election.json", Some(&"example_dumps/receipt_altered.json".to_string())),
            Err(Error::Verification(VerificationError::ReceiptInconsistent))
        ));
    }

    #[rocket::async_test]
    async fn correct_cli_usage() {
        let command_line = [PROGRAM_NAME, "verify", "example_dumps/election.json"];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 0);

        let command_line = [PROGRAM_NAME, "verify", "example_dumps/election_invalid_tally.json"];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 255);

        let command_line = [PROGRAM_NAME, "verify", "example_dumps/election_malformed.json"];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 1);

        let command_line = [PROGRAM_NAME, "verify", "not a real file"];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 1);
    }

    #[test]
    fn bad_cli_usage() {
        // No subcommand.
        cli().try_get_matches_from([PROGRAM_NAME]).unwrap_err();

        // Verify without a dump.
        cli().try_get_matches_from([PROGRAM_NAME, "verify"]).unwrap_err();

        // Demo with a non-numeric size.
        let command_line = [PROGRAM_NAME, "demo", "--users", "many", "--db-uri", "mongodb://localhost"];
        cli().try_get_matches_from(command_line).unwrap_err();
    }
}
