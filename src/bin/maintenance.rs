use std::{env, fs::File, io, process};

use anyhow::{anyhow, bail, Context, Result};
use diesel::prelude::*;
use uuid::Uuid;

use botreader::{
    archive::{export_csv, import_csv},
    auth::{password::hash_password, StaffRole},
    config::AppConfig,
    db::{self, PgPool},
    models::NewStaff,
    schema::{staff, update_cursor},
};

const USAGE: &str = "Usage:
  maintenance create-staff <username> <password> [admin|staff]
  maintenance import-archive <chat_id> <file.csv>
  maintenance export-archive [chat_id]
  maintenance reset-cursor";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["create-staff", username, password] => {
            create_staff(username, password, StaffRole::Operator)?
        }
        ["create-staff", username, password, role] => {
            let role: StaffRole = role.parse().map_err(|err: String| anyhow!(err))?;
            create_staff(username, password, role)?
        }
        ["import-archive", chat_id, path] => import_archive(chat_id, path)?,
        ["export-archive"] => export_archive(None)?,
        ["export-archive", chat_id] => export_archive(Some(chat_id))?,
        ["reset-cursor"] => reset_cursor()?,
        [cmd, ..] => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            process::exit(1);
        }
        [] => {
            eprintln!("{USAGE}");
            process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<PgPool> {
    let config = AppConfig::from_env()?;
    eprintln!(
        "using database {}",
        config.redacted_database_url()
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn create_staff(username: &str, password: &str, role: StaffRole) -> Result<()> {
    if username.trim().is_empty() || password.is_empty() {
        bail!("username and password must not be empty");
    }
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let account = NewStaff {
        id: Uuid::new_v4(),
        username: username.trim().to_string(),
        password_hash: hash_password(password)?,
        role: role.as_str().to_string(),
    };
    diesel::insert_into(staff::table)
        .values(&account)
        .execute(&mut conn)
        .with_context(|| format!("failed to create staff account {username}"))?;

    println!(
        "Created {role} account {} ({}).",
        account.username, account.id
    );
    Ok(())
}

fn import_archive(chat_id: &str, path: &str) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {path}"))?;
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let report = import_csv(&mut conn, chat_id, file)?;
    println!(
        "Imported {path}: {} new, {} updated, {} skipped.",
        report.new, report.updated, report.skipped
    );
    Ok(())
}

fn export_archive(chat_id: Option<&str>) -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let stdout = io::stdout();
    let written = export_csv(&mut conn, chat_id, stdout.lock())?;
    eprintln!("Exported {written} archived messages.");
    Ok(())
}

/// Forgets the consumed update offset so the next pass starts from whatever
/// the platform still holds.
fn reset_cursor() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let removed = diesel::delete(update_cursor::table)
        .execute(&mut conn)
        .context("failed to reset update cursor")?;
    if removed == 0 {
        println!("No update cursor stored.");
    } else {
        println!("Update cursor cleared.");
    }
    Ok(())
}
