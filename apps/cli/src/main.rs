#![deny(warnings)]

//! Headless driver: seeds a demo session, plays scripted turns and prints KPIs.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use persistence::{MemoryStore, SqliteStore, Store};
use rust_decimal::Decimal;
use sim_ai::KeywordAnalyzer;
use sim_core::*;
use sim_runtime::{PolicyDraft, SessionHandle, SessionRegistry, SessionSetup, SessionState, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const GM: PlayerId = PlayerId(1);
const POLITICIANS: [PlayerId; 4] = [PlayerId(2), PlayerId(3), PlayerId(4), PlayerId(5)];
const JOURNALIST: PlayerId = PlayerId(6);
const GOVERNOR: OfficeId = OfficeId(900);

const PROVINCES: [&str; 7] = ["Avel", "Brem", "Corso", "Dunmere", "Essa", "Falk", "Gorran"];
const OCCUPATIONS: [&str; 3] = ["farmer", "miner", "clerk"];

#[derive(Parser, Debug)]
#[command(name = "polity", about = "Play a scripted Polity session headlessly")]
struct Args {
    /// YAML game configuration; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Turns to play.
    #[arg(long, default_value_t = 6)]
    turns: u32,
    /// Overrides the configured RNG seed.
    #[arg(long)]
    seed: Option<u64>,
    /// SQLite URL to save into, e.g. sqlite://./saves/polity.db
    #[arg(long)]
    db: Option<String>,
}

fn load_config(path: Option<&PathBuf>, seed: Option<u64>) -> Result<GameConfig> {
    let mut cfg = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            serde_yaml::from_str::<GameConfig>(&text)
                .with_context(|| format!("parsing config {}", p.display()))?
        }
        None => GameConfig::default(),
    };
    if let Some(seed) = seed {
        cfg.rng_seed = seed;
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

fn demo_setup(config: GameConfig) -> SessionSetup {
    let mut setup = SessionSetup::new("demo", GM);
    setup.config = config;
    let mut next_slice = 100u64;
    for (pi, province) in PROVINCES.iter().enumerate() {
        for (oi, occupation) in OCCUPATIONS.iter().enumerate() {
            setup.slices.push(DemographicSlice {
                id: SliceId(next_slice),
                occupation: occupation.to_string(),
                class: if oi == 2 { "middle" } else { "working" }.to_string(),
                ethnicity: "plains".to_string(),
                religion: if pi % 2 == 0 { "orthodox" } else { "none" }.to_string(),
                province: province.to_string(),
                settlement: if oi == 2 { "urban" } else { "rural" }.to_string(),
                can_vote: true,
                population: 800 + 150 * pi as u64 + 400 * oi as u64,
            });
            next_slice += 1;
        }
    }
    setup
        .players
        .push(Player::new(GM, "gamemaster", Decimal::ZERO));
    for (i, id) in POLITICIANS.iter().enumerate() {
        setup.players.push(Player::new(
            *id,
            format!("politician-{}", i + 1),
            Decimal::new(20_000, 0),
        ));
    }
    let mut journalist = Player::new(JOURNALIST, "journalist", Decimal::new(5_000, 0));
    journalist.newspaper = Some("The Avel Courier".to_string());
    journalist.profession = Some("journalist".to_string());
    setup.players.push(journalist);
    setup.offices.push(Office {
        id: GOVERNOR,
        title: "Governor of Avel".to_string(),
        chamber: None,
        province: Some("Avel".to_string()),
        holder: None,
        term_started: None,
        term_ends: None,
    });
    setup
}

/// Scripted actions may be refused (AP, cash, timing); the script carries on.
fn attempt<T>(what: &str, result: Result<T, SimError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(action = what, error = %e, "scripted action refused");
            None
        }
    }
}

/// Population-weighted standing of `player` across the registry.
fn standing(s: &SessionState, player: PlayerId) -> f64 {
    let total: u64 = s.slices().iter().map(|sl| sl.population).sum();
    if total == 0 {
        return 0.0;
    }
    s.slices()
        .iter()
        .map(|sl| s.reputation().score(player, sl.id) * sl.population as f64)
        .sum::<f64>()
        / total as f64
}

async fn play_turn(
    h: &SessionHandle,
    turn: u64,
    policy: Option<PolicyId>,
    election: Option<ElectionId>,
) -> Result<()> {
    let slice_count = h.read(|s| s.slices().len() as u64).await;
    h.apply(|s| {
        for (i, p) in POLITICIANS.iter().enumerate() {
            let target = SliceId(100 + (turn * 5 + i as u64) % slice_count);
            attempt("campaign", s.start_campaign(*p, target));
            let endorsed = POLITICIANS[(i + 1) % POLITICIANS.len()];
            attempt("endorse", s.endorse(*p, endorsed));
        }
        let province = PROVINCES[(turn as usize) % PROVINCES.len()];
        if let Some(Some(found)) = attempt("prospect", s.prospect(POLITICIANS[3], province, Some("survey"))) {
            info!(province = %found.province, reward = %found.reward, "prospect succeeded");
        }
        if let Some(id) = policy {
            for (i, p) in POLITICIANS.iter().enumerate() {
                let choice = if i % 3 == 2 { VoteChoice::No } else { VoteChoice::Yes };
                attempt("vote policy", s.vote_policy(*p, id, choice));
            }
        }
        if let Some(id) = election {
            match s.election(id).map(|e| e.status) {
                Ok(ElectionStatus::Campaigning) => {
                    attempt("fund", s.fund_candidate(POLITICIANS[2], id, POLITICIANS[0], Decimal::new(2_000, 0)));
                    attempt("open voting", s.open_voting(GM, id));
                }
                Ok(ElectionStatus::Voting) => {
                    for (i, p) in POLITICIANS.iter().enumerate() {
                        attempt("vote election", s.vote_election(*p, id, POLITICIANS[i % 2]));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    })
    .await?;

    let subject = POLITICIANS[(turn as usize) % POLITICIANS.len()];
    let headline = if turn % 2 == 0 {
        "Major support for farmer reform"
    } else {
        "Scandal over mining levy"
    };
    attempt(
        "news",
        h.publish_news(JOURNALIST, subject, headline, "Reported from the provinces.")
            .await,
    );
    Ok(())
}

async fn print_kpis(h: &SessionHandle) {
    let line = h
        .read(|s| {
            let leaders: Vec<String> = POLITICIANS
                .iter()
                .map(|p| format!("{p}:{:+.2}", standing(s, *p)))
                .collect();
            format!(
                "KPI | turn: {} | gdp: {:.2} | campaigns: {} | articles: {} | discoveries: {} | standing: {}",
                s.current_turn(),
                s.economy().gdp_index,
                s.campaigns().filter(|c| c.status == CampaignStatus::Active).count(),
                s.articles().len(),
                s.discoveries().len(),
                leaders.join(" ")
            )
        })
        .await;
    println!("{line}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    info!(?args, "starting CLI");
    let config = load_config(args.config.as_ref(), args.seed)?;

    let store: Arc<dyn Store> = match &args.db {
        Some(url) => Arc::new(SqliteStore::connect(url).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let setup = demo_setup(config);
    let analyzer = Arc::new(KeywordAnalyzer::from_registry(&setup.slices));
    let registry = SessionRegistry::open(store, analyzer, Arc::new(SystemClock)).await?;
    let h = registry.create(setup).await?;
    h.initialize(GM, NaiveDate::from_ymd_opt(1990, 1, 1)).await?;
    let (lower, upper) = h
        .read(|s| (s.legislature().seats(House::Lower), s.legislature().seats(House::Upper)))
        .await;
    println!(
        "Session {} OK | provinces: {} | lower house: {} | upper house: {}",
        h.id(),
        PROVINCES.len(),
        lower,
        upper
    );

    let founder = POLITICIANS[0];
    let party = h.apply(|s| s.create_party(founder, "Reform League")).await?;
    h.apply(|s| s.join_party(POLITICIANS[1], party)).await?;
    attempt("fundraise", h.apply(|s| s.fundraise(founder)).await);

    let policy = attempt(
        "submit policy",
        h.submit_policy(
            POLITICIANS[1],
            PolicyDraft {
                description: "Growth support for farmer wages in Avel".to_string(),
                ..PolicyDraft::new("Rural wage reform", "")
            },
        )
        .await,
    );
    let election = h
        .apply(|s| {
            let id = s.create_election(GM, GOVERNOR, Some("Avel".to_string()))?;
            s.declare_candidacy(POLITICIANS[0], id)?;
            s.declare_candidacy(POLITICIANS[1], id)?;
            Ok(id)
        })
        .await?;

    for turn in 0..u64::from(args.turns) {
        play_turn(&h, turn, policy, Some(election)).await?;
        let report = h.advance(GM).await?;
        info!(
            turn = report.to_turn,
            enacted = report.enacted_policies.len(),
            elections = report.completed_elections.len(),
            "turn complete"
        );
        print_kpis(&h).await;
    }

    let summary = h
        .read(|s| {
            let mut rows: Vec<String> = POLITICIANS
                .iter()
                .filter_map(|p| s.player(*p).ok())
                .map(|p| {
                    format!(
                        "{} | standing: {:+.2} | cash: {} | office: {}",
                        p.name,
                        standing(s, p.id),
                        p.cash,
                        p.office
                            .and_then(|o| s.office(o).ok())
                            .map(|o| o.title.clone())
                            .unwrap_or_else(|| "-".to_string())
                    )
                })
                .collect();
            if let Some(p) = policy.and_then(|id| s.policy(id).ok()) {
                rows.push(format!("Policy '{}' | {:?}", p.title, p.status));
            }
            rows
        })
        .await;
    for row in summary {
        println!("{row}");
    }
    h.flush().await?;
    if let Some(err) = h.last_persistence_error().await {
        warn!(error = %err, "session was not fully saved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_actions_are_swallowed() {
        assert_eq!(attempt("ok", Ok::<_, SimError>(3)), Some(3));
        let refused: Result<(), SimError> = Err(SimError::NotFound {
            kind: "policy",
            id: 77,
        });
        assert_eq!(attempt("vote policy", refused), None);
    }

    #[tokio::test]
    async fn refused_votes_do_not_abort_the_turn() {
        let setup = demo_setup(GameConfig::default());
        let analyzer = Arc::new(KeywordAnalyzer::from_registry(&setup.slices));
        let registry = SessionRegistry::open(Arc::new(MemoryStore::new()), analyzer, Arc::new(SystemClock))
            .await
            .unwrap();
        let h = registry.create(setup).await.unwrap();
        h.initialize(GM, None).await.unwrap();
        // Neither id exists, so every vote is refused.
        play_turn(&h, 0, Some(PolicyId(404)), Some(ElectionId(404)))
            .await
            .unwrap();
        let report = h.advance(GM).await.unwrap();
        assert_eq!(report.to_turn, 1);
    }
}
