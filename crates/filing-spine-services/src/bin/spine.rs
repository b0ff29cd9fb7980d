//! Operator CLI for the filing spine. Exit codes: 0 success, 1 user
//! error, 2 terminal runtime error. Every network command honors the
//! global rate limit and the configured user agent.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use filing_spine_core::models::{
    Entity, EntityRelationship, Filing, FilingFilter, IdentifierClaim, OwnerType,
    RelationshipType,
};
use filing_spine_core::{create_pool, database, AppError, AppResult, Config, DatabasePool};
use filing_spine_entity::{ResolutionContext, Resolver, SpineSnapshot};
use filing_spine_extract::SectionParser;
use filing_spine_ingest::feeds::FeedAdapter;
use filing_spine_ingest::{
    DailyIndexAdapter, DocumentStore, FeedCollector, FilingFetcher, FullIndexAdapter,
    FullTextSearch, SearchQuery, SecClient, SecRateLimiter, SymbologyRefresher,
};

#[derive(Parser, Debug)]
#[command(name = "spine", about = "SEC filing spine operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a filing bundle into the document store
    Download {
        #[arg(long)]
        cik: String,
        #[arg(long)]
        accession: String,
    },
    /// List silver filings
    List {
        #[arg(long)]
        cik: Option<String>,
        #[arg(long)]
        form: Option<String>,
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(long)]
        until: Option<NaiveDate>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Fetch, parse and store sections for one filing
    Extract {
        #[arg(long)]
        cik: String,
        #[arg(long)]
        accession: String,
    },
    /// Relationship graph queries
    Graph {
        #[command(subcommand)]
        command: GraphCommand,
    },
    /// Drain a feed's backlog into the record store
    Sync {
        /// Feed to drain: daily or full
        #[arg(long)]
        feed: String,
        /// Daily backfill start date
        #[arg(long, default_value = "2024-01-01")]
        start: NaiveDate,
    },
    /// Discover filings via full-text search (exhibit backfill)
    Discover {
        /// Search phrase; quote for exact match
        query: String,
        #[arg(long)]
        form: Option<String>,
        /// Admit discovered filings into the record store
        #[arg(long, default_value_t = false)]
        admit: bool,
    },
    /// Entity spine queries
    Entity {
        #[command(subcommand)]
        command: EntityCommand,
    },
    /// Symbology maintenance
    Symbology {
        #[command(subcommand)]
        command: SymbologyCommand,
    },
}

#[derive(Subcommand, Debug)]
enum GraphCommand {
    /// Outgoing SUPPLIER_TO edges of an entity
    Suppliers {
        entity_id: Uuid,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Outgoing CUSTOMER_OF edges of an entity
    Customers {
        entity_id: Uuid,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Shortest relationship path between two entities
    Path {
        from: Uuid,
        to: Uuid,
        #[arg(long, default_value_t = 5)]
        max_depth: usize,
    },
}

#[derive(Subcommand, Debug)]
enum EntityCommand {
    /// Run the resolution ladder over a query string
    Lookup {
        query: String,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Substring search over primary names
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand, Debug)]
enum SymbologyCommand {
    /// Refresh entities, listings and claims from the SEC tickers file
    Refresh,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{}", error_envelope(&e));
            let code = match e {
                AppError::Validation(_)
                | AppError::ValidationErrors(_)
                | AppError::BadRequest(_)
                | AppError::InvalidDateFormat(_)
                | AppError::NotFound(_) => 1,
                _ => 2,
            };
            std::process::exit(code);
        }
    }
}

fn error_envelope(e: &AppError) -> String {
    serde_json::json!({ "error": e.to_string() }).to_string()
}

async fn run(cli: Cli) -> AppResult<()> {
    let config = Config::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    database::run_migrations(&config.database_url).await?;

    let rate_limiter = SecRateLimiter::new(config.sec.requests_per_second)?;
    let client = SecClient::new(&config.sec, rate_limiter)?;
    let store = DocumentStore::new(config.sec.data_dir.clone());

    match cli.command {
        Command::Download { cik, accession } => {
            let fetcher = FilingFetcher::new(client, store);
            let bundle = fetcher.fetch_bundle(&cik, &accession).await?;
            println!(
                "downloaded {} ({} bytes) and {} exhibits to {}",
                bundle.primary_document.filename,
                bundle.primary_document.content.len(),
                bundle.exhibits.len(),
                bundle.primary_document.path.parent().unwrap_or_else(|| std::path::Path::new(".")).display()
            );
        }
        Command::List {
            cik,
            form,
            since,
            until,
            limit,
        } => {
            let filter = FilingFilter {
                cik,
                form_type: form,
                filed_after: since,
                filed_before: until,
                limit: Some(limit),
                offset: None,
            };
            for filing in Filing::list(&pool, &filter).await? {
                println!(
                    "{}  {:<8} {}  cik={}",
                    filing.filed_date, filing.form_type, filing.accession_number, filing.filer_cik
                );
            }
        }
        Command::Extract { cik, accession } => {
            let fetcher = FilingFetcher::new(client, store);
            let bundle = fetcher.fetch_bundle(&cik, &accession).await?;

            let parser = SectionParser::new(
                config.parser.version.clone(),
                config.parser.max_section_bytes,
            );
            let primary = String::from_utf8_lossy(&bundle.primary_document.content);
            let (_, mut sections, issues) =
                parser.parse_primary(&bundle.accession_number, &bundle.primary_document.filename, &primary);
            for exhibit in &bundle.exhibits {
                let html = String::from_utf8_lossy(&exhibit.content);
                if let Some((_, section)) =
                    parser.parse_exhibit(&bundle.accession_number, &exhibit.filename, &html)
                {
                    sections.push(section);
                }
            }

            let stored = filing_spine_core::models::FilingSection::replace_current(
                &pool,
                &bundle.accession_number,
                &config.parser.version,
                sections,
            )
            .await?;

            for section in &stored {
                println!(
                    "{:<8} [{:>8}, {:>8})  {} words  {}",
                    section.section_key,
                    section.char_start,
                    section.char_end,
                    section.word_count,
                    section.title.as_deref().unwrap_or("")
                );
            }
            for issue in issues {
                eprintln!("warning: {}: {}", issue.section_key, issue.detail);
            }
        }
        Command::Graph { command } => match command {
            GraphCommand::Suppliers { entity_id, as_of } => {
                print_edges(&pool, entity_id, RelationshipType::SupplierTo, as_of).await?;
            }
            GraphCommand::Customers { entity_id, as_of } => {
                print_edges(&pool, entity_id, RelationshipType::CustomerOf, as_of).await?;
            }
            GraphCommand::Path {
                from,
                to,
                max_depth,
            } => match find_path(&pool, from, to, max_depth).await? {
                Some(path) => {
                    for (idx, hop) in path.iter().enumerate() {
                        println!("{}: {}", idx, hop);
                    }
                }
                None => println!("no path within {} hops", max_depth),
            },
        },
        Command::Sync { feed, start } => {
            let collector = Arc::new(FeedCollector::new(pool.clone(), config.worker.clone()));
            let adapter: Arc<dyn FeedAdapter> = match feed.as_str() {
                "daily" => Arc::new(DailyIndexAdapter::new(client, start)),
                "full" => {
                    use chrono::Datelike;
                    Arc::new(FullIndexAdapter::new(client, start.year(), 1))
                }
                other => {
                    return Err(AppError::bad_request(format!(
                        "unknown feed {:?}, expected daily or full",
                        other
                    )))
                }
            };

            let (_tx, mut shutdown) = watch::channel(false);
            let admitted = collector.drain(adapter.as_ref(), &mut shutdown).await?;
            println!("sync complete: {} new records", admitted);
        }
        Command::Discover { query, form, admit } => {
            let search = FullTextSearch::new(client);
            let hits = search
                .discover(&SearchQuery {
                    q: query,
                    forms: form,
                    ..Default::default()
                })
                .await?;

            for hit in &hits {
                println!(
                    "{}  {:<8} {}  cik={}  {}",
                    hit.file_date, hit.form, hit.accession_number, hit.cik, hit.display_name
                );
            }

            if admit {
                let mut admitted = 0;
                for hit in &hits {
                    let candidate = filing_spine_core::models::RecordCandidate {
                        natural_key: format!("sec:filing:{}", hit.accession_number),
                        feed_name: "full_text_search".to_string(),
                        source_url: format!(
                            "https://www.sec.gov/Archives/edgar/data/{}/{}",
                            hit.cik.trim_start_matches('0'),
                            hit.accession_number
                        ),
                        published_at: None,
                        source_updated_at: None,
                        raw_payload: serde_json::json!({
                            "company_name": hit.display_name,
                            "form_type": hit.form,
                        }),
                        cik: Some(hit.cik.clone()),
                        form_type: Some(hit.form.clone()),
                        filing_date: NaiveDate::parse_from_str(&hit.file_date, "%Y-%m-%d").ok(),
                        accession_number: Some(hit.accession_number.clone()),
                    };
                    let result =
                        filing_spine_core::models::Record::admit(&pool, &candidate).await?;
                    if result.outcome == filing_spine_core::models::AdmitOutcome::New {
                        admitted += 1;
                    }
                }
                println!("admitted {} new records", admitted);
            }
        }
        Command::Entity { command } => match command {
            EntityCommand::Lookup { query, as_of } => {
                let snapshot = Arc::new(SpineSnapshot::load(&pool).await?);
                let resolver = Resolver::new(snapshot, config.resolver.clone());
                let as_of = as_of.unwrap_or_else(|| chrono::Utc::now().date_naive());

                let resolution =
                    resolver.resolve(&query, &ResolutionContext::default(), as_of);
                match resolution.entity_id {
                    Some(id) => {
                        let entity = Entity::find_by_id(&pool, id).await?;
                        println!(
                            "{}  {:?} (confidence {:.2})",
                            id, resolution.method, resolution.confidence
                        );
                        if let Some(entity) = entity {
                            println!("  {}  [{}]", entity.primary_name, entity.entity_type);
                            for claim in
                                IdentifierClaim::for_owner(&pool, OwnerType::Entity, id).await?
                            {
                                println!(
                                    "  {}={} [{} .. {}]",
                                    claim.scheme,
                                    claim.value,
                                    claim.valid_from,
                                    claim
                                        .valid_to
                                        .map(|d| d.to_string())
                                        .unwrap_or_else(|| "open".to_string())
                                );
                            }
                        }
                    }
                    None => {
                        println!(
                            "unresolved ({:?}, warnings: {:?})",
                            resolution.method, resolution.warnings
                        );
                    }
                }
            }
            EntityCommand::Search { query, limit } => {
                for entity in Entity::search_by_name(&pool, &query, limit).await? {
                    println!("{}  {}  [{}]", entity.id, entity.primary_name, entity.status);
                }
            }
        },
        Command::Symbology { command } => match command {
            SymbologyCommand::Refresh => {
                let refresher = SymbologyRefresher::new(client, pool.clone());
                let stats = refresher.refresh().await?;
                println!(
                    "symbology: {} rows, {} entities created, {} claims created, {} closed",
                    stats.rows_seen,
                    stats.entities_created,
                    stats.claims_created,
                    stats.claims_closed
                );
            }
        },
    }

    Ok(())
}

async fn print_edges(
    pool: &DatabasePool,
    entity_id: Uuid,
    kind: RelationshipType,
    as_of: Option<NaiveDate>,
) -> AppResult<()> {
    let edges = EntityRelationship::outgoing(pool, entity_id, kind, as_of).await?;
    for edge in edges {
        let target = Entity::find_by_id(pool, edge.target_entity_id).await?;
        println!(
            "{}  {}  last_seen={}  {}",
            edge.target_entity_id,
            target
                .map(|e| e.primary_name)
                .unwrap_or_else(|| "?".to_string()),
            edge.last_seen_at.date_naive(),
            edge.valid_to
                .map(|d| format!("closed {}", d))
                .unwrap_or_else(|| "open".to_string()),
        );
    }
    Ok(())
}

/// Breadth-first search over typed edges in both directions
async fn find_path(
    pool: &DatabasePool,
    from: Uuid,
    to: Uuid,
    max_depth: usize,
) -> AppResult<Option<Vec<String>>> {
    let kinds = [
        RelationshipType::SupplierTo,
        RelationshipType::CustomerOf,
        RelationshipType::SubsidiaryOf,
        RelationshipType::PartnerOf,
    ];

    let mut seen: HashSet<Uuid> = HashSet::from([from]);
    let mut frontier: VecDeque<(Uuid, Vec<String>, usize)> =
        VecDeque::from([(from, vec![from.to_string()], 0)]);

    while let Some((node, path, depth)) = frontier.pop_front() {
        if node == to {
            return Ok(Some(path));
        }
        if depth >= max_depth {
            continue;
        }
        for kind in kinds {
            for edge in EntityRelationship::outgoing(pool, node, kind, None).await? {
                if seen.insert(edge.target_entity_id) {
                    let mut next = path.clone();
                    next.push(format!("-[{}]-> {}", kind.as_str(), edge.target_entity_id));
                    frontier.push_back((edge.target_entity_id, next, depth + 1));
                }
            }
            for edge in EntityRelationship::incoming(pool, node, kind, None).await? {
                if seen.insert(edge.source_entity_id) {
                    let mut next = path.clone();
                    next.push(format!("<-[{}]- {}", kind.as_str(), edge.source_entity_id));
                    frontier.push_back((edge.source_entity_id, next, depth + 1));
                }
            }
        }
    }

    Ok(None)
}
