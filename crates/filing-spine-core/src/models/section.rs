use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::DatabasePool;
use crate::error::{AppError, AppResult};
use crate::schema::filing_sections;

/// Named sections a filing can be segmented into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionKey {
    Item1,
    Item1A,
    Item7,
    Item7A,
    Item8,
    Item9A,
    Ex21,
    Ex10,
    Other,
}

impl SectionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKey::Item1 => "ITEM_1",
            SectionKey::Item1A => "ITEM_1A",
            SectionKey::Item7 => "ITEM_7",
            SectionKey::Item7A => "ITEM_7A",
            SectionKey::Item8 => "ITEM_8",
            SectionKey::Item9A => "ITEM_9A",
            SectionKey::Ex21 => "EX_21",
            SectionKey::Ex10 => "EX_10",
            SectionKey::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<SectionKey> {
        match s.to_uppercase().as_str() {
            "ITEM_1" => Some(SectionKey::Item1),
            "ITEM_1A" => Some(SectionKey::Item1A),
            "ITEM_7" => Some(SectionKey::Item7),
            "ITEM_7A" => Some(SectionKey::Item7A),
            "ITEM_8" => Some(SectionKey::Item8),
            "ITEM_9A" => Some(SectionKey::Item9A),
            "EX_21" => Some(SectionKey::Ex21),
            "EX_10" => Some(SectionKey::Ex10),
            "OTHER" => Some(SectionKey::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for SectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed section with offsets into the canonicalized document text
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = filing_sections)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FilingSection {
    pub id: Uuid,
    pub accession_number: String,
    pub section_key: String,
    pub title: Option<String>,
    pub char_start: i32,
    pub char_end: i32,
    pub text: String,
    pub word_count: i32,
    pub document_filename: String,
    pub parser_version: String,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = filing_sections)]
pub struct NewFilingSection {
    pub accession_number: String,
    pub section_key: String,
    pub title: Option<String>,
    pub char_start: i32,
    pub char_end: i32,
    pub text: String,
    pub word_count: i32,
    pub document_filename: String,
    pub parser_version: String,
}

impl NewFilingSection {
    /// Offsets must delimit exactly the stored text. A violation here is a
    /// parser defect, not recoverable input.
    pub fn check_span(&self) -> AppResult<()> {
        let len = (self.char_end - self.char_start) as usize;
        if self.char_start >= self.char_end || self.text.len() != len {
            return Err(AppError::IntegrityViolation(format!(
                "section {} span [{}, {}) does not match text length {}",
                self.section_key,
                self.char_start,
                self.char_end,
                self.text.len()
            )));
        }
        Ok(())
    }
}

impl FilingSection {
    /// Replace the current section set for an accession with the output of a
    /// new parse. Prior rows are kept but lose is_current; rows for the same
    /// parser version are overwritten so a re-run is byte-identical.
    pub async fn replace_current(
        pool: &DatabasePool,
        accession: &str,
        parser_version: &str,
        sections: Vec<NewFilingSection>,
    ) -> AppResult<Vec<FilingSection>> {
        use crate::schema::filing_sections::dsl;

        for section in &sections {
            section.check_span()?;
        }

        let mut conn = pool.get().await?;
        let accession = accession.to_string();
        let parser_version = parser_version.to_string();

        conn.transaction::<Vec<FilingSection>, AppError, _>(|conn| {
            async move {
                diesel::delete(
                    dsl::filing_sections
                        .filter(dsl::accession_number.eq(&accession))
                        .filter(dsl::parser_version.eq(&parser_version)),
                )
                .execute(conn)
                .await?;

                diesel::update(
                    dsl::filing_sections
                        .filter(dsl::accession_number.eq(&accession))
                        .filter(dsl::is_current.eq(true)),
                )
                .set(dsl::is_current.eq(false))
                .execute(conn)
                .await?;

                let mut inserted = Vec::with_capacity(sections.len());
                for section in &sections {
                    let row: FilingSection = diesel::insert_into(dsl::filing_sections)
                        .values(section)
                        .get_result(conn)
                        .await?;
                    inserted.push(row);
                }
                Ok(inserted)
            }
            .scope_boxed()
        })
        .await
    }

    /// Current sections for an accession, in document order
    pub async fn current_for(pool: &DatabasePool, accession: &str) -> AppResult<Vec<FilingSection>> {
        use crate::schema::filing_sections::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::filing_sections
            .filter(dsl::accession_number.eq(accession))
            .filter(dsl::is_current.eq(true))
            .order(dsl::char_start.asc())
            .load::<FilingSection>(&mut conn)
            .await?;
        Ok(rows)
    }

    pub async fn find(
        pool: &DatabasePool,
        accession: &str,
        key: SectionKey,
    ) -> AppResult<Option<FilingSection>> {
        use crate::schema::filing_sections::dsl;

        let mut conn = pool.get().await?;
        let row = dsl::filing_sections
            .filter(dsl::accession_number.eq(accession))
            .filter(dsl::section_key.eq(key.as_str()))
            .filter(dsl::is_current.eq(true))
            .first::<FilingSection>(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }
}
