use std::io::{Read, Write};

use diesel::{pg::PgConnection, prelude::*};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{
    models::{ArchivedTextMessage, NewArchivedTextMessage},
    schema::archived_text_messages,
};

pub const HASHTAG_SEPARATOR: char = ',';

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: {message}")]
    InvalidRow { row: usize, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct ImportRow {
    sid: String,
    text: String,
    #[serde(default)]
    hashtags: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
}

pub fn split_hashtags(raw: &str) -> Vec<String> {
    raw.split(HASHTAG_SEPARATOR)
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Imports `sid,text,hashtags` rows into the archive of `chat_id`. Rows are
/// keyed by `sid`; a row identical to the stored one is skipped. All rows
/// land in one transaction or none do.
pub fn import_csv<R: Read>(
    conn: &mut PgConnection,
    chat_id: &str,
    input: R,
) -> Result<ImportReport, ArchiveError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut rows = Vec::new();
    for (index, record) in reader.deserialize::<ImportRow>().enumerate() {
        let row = record?;
        if row.sid.is_empty() {
            return Err(ArchiveError::InvalidRow {
                row: index + 1,
                message: "sid must not be empty".into(),
            });
        }
        rows.push(row);
    }

    let report = conn.transaction::<_, ArchiveError, _>(|conn| {
        let mut report = ImportReport::default();
        for row in rows {
            let hashtags = split_hashtags(&row.hashtags);
            let existing: Option<ArchivedTextMessage> = archived_text_messages::table
                .filter(archived_text_messages::sid.eq(&row.sid))
                .first(conn)
                .optional()?;

            match existing {
                Some(stored)
                    if stored.chat_id == chat_id
                        && stored.text == row.text
                        && stored.hashtags == hashtags =>
                {
                    report.skipped += 1;
                }
                Some(stored) => {
                    diesel::update(archived_text_messages::table.find(stored.id))
                        .set((
                            archived_text_messages::chat_id.eq(chat_id),
                            archived_text_messages::text.eq(&row.text),
                            archived_text_messages::hashtags.eq(&hashtags),
                        ))
                        .execute(conn)?;
                    report.updated += 1;
                }
                None => {
                    diesel::insert_into(archived_text_messages::table)
                        .values(&NewArchivedTextMessage {
                            id: Uuid::new_v4(),
                            sid: row.sid,
                            chat_id: chat_id.to_string(),
                            text: row.text,
                            hashtags,
                        })
                        .execute(conn)?;
                    report.new += 1;
                }
            }
        }
        Ok(report)
    })?;

    info!(
        chat_id,
        new = report.new,
        updated = report.updated,
        skipped = report.skipped,
        "archive import finished"
    );
    Ok(report)
}

/// Writes the archive, optionally limited to one chat, as
/// `sid,chat_id,text,hashtags`. Returns the number of rows written.
pub fn export_csv<W: Write>(
    conn: &mut PgConnection,
    chat_id: Option<&str>,
    output: W,
) -> Result<usize, ArchiveError> {
    let mut query = archived_text_messages::table
        .order(archived_text_messages::sid.asc())
        .into_boxed();
    if let Some(chat_id) = chat_id {
        query = query.filter(archived_text_messages::chat_id.eq(chat_id));
    }
    let rows: Vec<ArchivedTextMessage> = query.load(conn)?;

    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["sid", "chat_id", "text", "hashtags"])?;
    for row in &rows {
        let hashtags = row.hashtags.join(&HASHTAG_SEPARATOR.to_string());
        writer.write_record([
            row.sid.as_str(),
            row.chat_id.as_str(),
            row.text.as_str(),
            hashtags.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::split_hashtags;

    #[test]
    fn splits_and_trims_hashtags() {
        assert_eq!(
            split_hashtags(" #rust, #bale ,,"),
            vec!["#rust".to_string(), "#bale".to_string()]
        );
        assert!(split_hashtags("").is_empty());
    }
}
