//! Roster command-line entry point.
//!
//! # Responsibility
//! - Wire configuration, logging, the connection pool and the user service
//!   into a small operational surface: migrations plus smoke-level CRUD.
//! - Keep output deterministic for quick local sanity checks.

use roster_core::db::migrations::latest_version;
use roster_core::{
    core_version, init_logging, Config, ConnectionPool, CreateUserRequest, Scope,
    SqliteUserRepository, Transactor, UserService,
};
use std::process::ExitCode;
use uuid::Uuid;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let Some(command) = args.first().map(String::as_str) else {
        print_usage();
        return ExitCode::FAILURE;
    };

    match command {
        "-h" | "--help" | "help" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" => {
            println!("roster {}", core_version());
            ExitCode::SUCCESS
        }
        "migrate" | "create-user" | "get-user" => run(command, &args[1..]),
        other => {
            eprintln!("unknown command: {other}");
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn run(command: &str, args: &[String]) -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_logging(&config.log) {
        eprintln!("logging error: {err}");
        return ExitCode::FAILURE;
    }

    let pool = match ConnectionPool::open(&config.db) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("database error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if command == "migrate" {
        // Opening the pool already applied every pending migration.
        println!(
            "database ready at {} schema_version={}",
            config.db.path.display(),
            latest_version()
        );
        return ExitCode::SUCCESS;
    }

    let (transactor, resolver) = Transactor::new(pool);
    let service = UserService::new(SqliteUserRepository::new(resolver), transactor);
    let scope = Scope::new();

    match command {
        "create-user" => {
            let Some(username) = args.first() else {
                eprintln!("usage: roster create-user <username>");
                return ExitCode::FAILURE;
            };
            let request = CreateUserRequest {
                username: username.clone(),
            };
            match service.create_user(&scope, &request) {
                Ok(user) => {
                    println!(
                        "created id={} username={} created_at={}",
                        user.id, user.username, user.created_at
                    );
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("create-user failed: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        "get-user" => {
            let Some(raw_id) = args.first() else {
                eprintln!("usage: roster get-user <id>");
                return ExitCode::FAILURE;
            };
            let id = match Uuid::parse_str(raw_id) {
                Ok(id) => id,
                Err(err) => {
                    eprintln!("invalid user id `{raw_id}`: {err}");
                    return ExitCode::FAILURE;
                }
            };
            match service.get_user(&scope, id) {
                Ok(user) => {
                    println!(
                        "id={} username={} created_at={}",
                        user.id, user.username, user.created_at
                    );
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("get-user failed: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        _ => unreachable!("command validated in main"),
    }
}

fn print_usage() {
    eprintln!("roster — user directory service tooling");
    eprintln!();
    eprintln!("usage:");
    eprintln!("  roster migrate                 apply pending schema migrations");
    eprintln!("  roster create-user <username>  create a user");
    eprintln!("  roster get-user <id>           look up a user by id");
    eprintln!("  roster version                 print the core version");
    eprintln!();
    eprintln!("environment:");
    eprintln!("  ROSTER_DB_PATH (required), ROSTER_DB_MAX_CONNS, ROSTER_DB_BUSY_TIMEOUT_MS,");
    eprintln!("  ROSTER_LOG_LEVEL, ROSTER_LOG_DIR");
}
