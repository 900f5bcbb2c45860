//! Decoder for the bulk per-game CSV export (one row per player plus one per team).

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use lec_core::normalize::{is_blank, non_blank};
use lec_core::{GameRow, Side, StatLine, TimelineSnapshot, SNAPSHOT_MINUTES};
use serde::Serialize;
use tracing::{debug, warn};

use crate::AdapterError;

pub const GAME_KEY_COLUMN: &str = "gameid";

#[derive(Debug, Clone, Default)]
pub struct CsvLogOptions {
    /// Extra numeric columns to capture verbatim into [`GameRow::counters`].
    pub counter_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub row_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedGameLog {
    pub rows: Vec<GameRow>,
    pub issues: Vec<RowIssue>,
    pub missing_columns: Vec<String>,
}

/// Columns read from every row; absent ones are reported once per batch.
const EXPECTED_COLUMNS: &[&str] = &[
    "league", "year", "split", "playoffs", "date", "game", "patch", "side", "position",
    "playername", "playerid", "teamname", "teamid", "champion", "gamelength", "result",
];

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim_start_matches('\u{feff}').trim().to_lowercase(), i))
            .collect();
        Self { index }
    }

    fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn first(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.index.get(*n).copied())
    }
}

struct Cells<'a> {
    record: &'a StringRecord,
    columns: &'a Columns,
}

impl<'a> Cells<'a> {
    fn raw(&self, names: &[&str]) -> Option<&'a str> {
        self.columns
            .first(names)
            .and_then(|i| self.record.get(i))
            .and_then(|v| non_blank(Some(v)))
    }

    fn text(&self, name: &str) -> Option<String> {
        self.raw(&[name]).map(str::to_string)
    }

    fn float(&self, names: &[&str]) -> Option<f64> {
        self.raw(names).and_then(parse_float)
    }

    fn int(&self, name: &str) -> Option<i64> {
        self.raw(&[name]).and_then(parse_int)
    }

    fn int32(&self, name: &str) -> Option<i32> {
        self.int(name).and_then(|v| i32::try_from(v).ok())
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.raw(&[name]).and_then(parse_flag)
    }
}

fn parse_float(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Accepts `3` and `3.0`; anything else is `None`.
pub fn parse_int(value: &str) -> Option<i64> {
    let v = value.trim();
    if is_blank(v) {
        return None;
    }
    v.parse::<i64>()
        .ok()
        .or_else(|| parse_float(v).map(|f| f.round() as i64))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" => Some(true),
        "0" | "0.0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let v = value.trim();
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(v, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn stat_line(cells: &Cells<'_>, game_length_secs: Option<i32>) -> StatLine {
    let damage_taken = cells.int("damagetaken").or_else(|| {
        let per_minute = cells.float(&["damagetakenperminute"])?;
        let minutes = f64::from(game_length_secs?) / 60.0;
        Some((per_minute * minutes).round() as i64)
    });
    StatLine {
        kills: cells.int32("kills"),
        deaths: cells.int32("deaths"),
        assists: cells.int32("assists"),
        double_kills: cells.int32("doublekills"),
        triple_kills: cells.int32("triplekills"),
        quadra_kills: cells.int32("quadrakills"),
        penta_kills: cells.int32("pentakills"),
        first_blood_kill: cells.flag("firstbloodkill"),
        first_blood_assist: cells.flag("firstbloodassist"),
        first_blood_victim: cells.flag("firstbloodvictim"),
        damage_to_champions: cells.int("damagetochampions"),
        damage_taken,
        wards_placed: cells.int32("wardsplaced"),
        wards_killed: cells.int32("wardskilled"),
        control_wards_bought: cells.int32("controlwardsbought"),
        vision_score: cells.int32("visionscore"),
        total_gold: cells.int32("totalgold"),
        total_cs: cells
            .float(&["total cs", "total_cs"])
            .map(|v| v.round() as i32),
        minion_kills: cells.int32("minionkills"),
        monster_kills: cells.int32("monsterkills"),
        monster_kills_own_jungle: cells.int32("monsterkillsownjungle"),
        monster_kills_enemy_jungle: cells.int32("monsterkillsenemyjungle"),
    }
}

fn snapshots(cells: &Cells<'_>) -> Vec<TimelineSnapshot> {
    SNAPSHOT_MINUTES
        .iter()
        .map(|&minute| TimelineSnapshot {
            minute,
            gold: cells.int32(&format!("goldat{minute}")),
            xp: cells.int32(&format!("xpat{minute}")),
            cs: cells.int32(&format!("csat{minute}")),
            kills: cells.int32(&format!("killsat{minute}")),
            assists: cells.int32(&format!("assistsat{minute}")),
            deaths: cells.int32(&format!("deathsat{minute}")),
        })
        .filter(|s| {
            s.gold.is_some() || s.xp.is_some() || s.cs.is_some() || s.kills.is_some()
        })
        .collect()
}

fn decode_row(row_index: usize, cells: &Cells<'_>, options: &CsvLogOptions) -> Result<GameRow, RowIssue> {
    let Some(game_key) = cells.text(GAME_KEY_COLUMN) else {
        return Err(RowIssue {
            row_index,
            reason: "blank game id".to_string(),
        });
    };
    let side = match cells.raw(&["side"]) {
        Some(raw) => raw.parse::<Side>().map_err(|e| RowIssue {
            row_index,
            reason: e.to_string(),
        })?,
        None => {
            return Err(RowIssue {
                row_index,
                reason: format!("game {game_key}: missing side"),
            })
        }
    };
    let game_length_secs = cells.int32("gamelength");

    let counters = options
        .counter_columns
        .iter()
        .filter_map(|name| {
            cells
                .raw(&[name.to_lowercase().as_str()])
                .map(|v| (name.clone(), v.to_string()))
        })
        .collect();

    Ok(GameRow {
        row_index,
        game_key,
        league: cells.text("league"),
        year: cells.int32("year"),
        split: cells.text("split"),
        playoffs: cells.flag("playoffs").unwrap_or(false),
        date: cells.raw(&["date"]).and_then(parse_datetime),
        game_number: cells
            .int("game")
            .and_then(|g| u32::try_from(g).ok())
            .filter(|g| *g > 0),
        patch: cells.text("patch"),
        side: Some(side),
        position: cells.text("position"),
        player_key: cells.text("playerid"),
        player_name: cells.text("playername"),
        team_key: cells.text("teamid"),
        team_name: cells.text("teamname"),
        champion: cells.text("champion"),
        picks: std::array::from_fn(|i| cells.text(&format!("pick{}", i + 1))),
        bans: std::array::from_fn(|i| cells.text(&format!("ban{}", i + 1))),
        game_length_secs,
        result: cells.flag("result"),
        stats: stat_line(cells, game_length_secs),
        snapshots: snapshots(cells),
        counters,
    })
}

/// Decode a whole export. Only a missing game-id column rejects the batch; bad rows are
/// reported in [`ParsedGameLog::issues`] and skipped.
pub fn parse_game_log(bytes: &[u8], options: &CsvLogOptions) -> Result<ParsedGameLog, AdapterError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Fields)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| AdapterError::Message(format!("reading csv header: {e}")))?
        .clone();
    let columns = Columns::from_headers(&headers);
    if !columns.has(GAME_KEY_COLUMN) {
        return Err(AdapterError::MissingColumn(GAME_KEY_COLUMN.to_string()));
    }

    let mut parsed = ParsedGameLog {
        missing_columns: EXPECTED_COLUMNS
            .iter()
            .filter(|c| !columns.has(c))
            .map(|c| c.to_string())
            .collect(),
        ..Default::default()
    };
    if !parsed.missing_columns.is_empty() {
        warn!(columns = ?parsed.missing_columns, "bulk export is missing expected columns");
    }

    let mut record = StringRecord::new();
    let mut row_index = 0usize;
    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let cells = Cells {
                    record: &record,
                    columns: &columns,
                };
                match decode_row(row_index, &cells, options) {
                    Ok(row) => parsed.rows.push(row),
                    Err(issue) => {
                        warn!(row = issue.row_index, reason = %issue.reason, "skipping malformed row");
                        parsed.issues.push(issue);
                    }
                }
            }
            Err(err) => {
                warn!(row = row_index, error = %err, "skipping unreadable row");
                parsed.issues.push(RowIssue {
                    row_index,
                    reason: err.to_string(),
                });
            }
        }
        row_index += 1;
    }

    debug!(rows = parsed.rows.len(), issues = parsed.issues.len(), "decoded bulk export");
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "gameid,league,year,split,playoffs,date,game,patch,side,position,playername,playerid,teamname,teamid,champion,ban1,pick1,gamelength,result,kills,deaths,assists,total cs,damagetakenperminute,goldat10,dragons";

    #[test]
    fn decodes_typed_fields_leniently() {
        let csv = format!(
            "{HEADER}\n\
             G1,LEC,2025,Winter,0,2025-01-18 17:05:12,1,15.01,Blue,mid,Caps,oe:player:aa,G2 Esports,oe:team:bb,Ahri,,,1800,1,3.0,nan,7,250.0,600,3400,\n\
             G1,LEC,2025,Winter,0,2025-01-18 17:05:12,1,15.01,Blue,team,,,G2 Esports,oe:team:bb,,Rumble,Ahri,1800,1,12,4,30,,,,2\n"
        );
        let options = CsvLogOptions {
            counter_columns: vec!["dragons".into(), "barons".into()],
        };
        let parsed = parse_game_log(csv.as_bytes(), &options).expect("parse");
        assert!(parsed.issues.is_empty());
        assert_eq!(parsed.rows.len(), 2);

        let player = &parsed.rows[0];
        assert_eq!(player.side, Some(Side::Blue));
        assert_eq!(player.game_number, Some(1));
        assert_eq!(player.stats.kills, Some(3));
        assert_eq!(player.stats.deaths, None);
        assert_eq!(player.stats.total_cs, Some(250));
        assert_eq!(player.stats.damage_taken, Some(18_000));
        assert_eq!(player.snapshots.len(), 1);
        assert_eq!(player.snapshots[0].gold, Some(3400));
        assert!(player.counters.is_empty());
        assert!(player.date.is_some());

        let team = &parsed.rows[1];
        assert!(team.is_team_row());
        assert_eq!(team.picks[0].as_deref(), Some("Ahri"));
        assert_eq!(team.bans[0].as_deref(), Some("Rumble"));
        assert_eq!(team.picks[1], None);
        assert_eq!(team.counters.get("dragons").map(String::as_str), Some("2"));
        assert!(parsed.missing_columns.is_empty());
    }

    #[test]
    fn rows_without_side_or_game_id_are_reported() {
        let csv = format!(
            "{HEADER}\n\
             ,LEC,2025,Winter,0,,1,,Blue,top,,,,,,,,,,,,,,,,\n\
             G2,LEC,2025,Winter,0,,1,,Purple,top,,,,,,,,,,,,,,,,\n"
        );
        let parsed = parse_game_log(csv.as_bytes(), &CsvLogOptions::default()).expect("parse");
        assert!(parsed.rows.is_empty());
        assert_eq!(parsed.issues.len(), 2);
        assert_eq!(parsed.issues[1].row_index, 1);
    }

    #[test]
    fn missing_game_id_column_rejects_batch() {
        let err = parse_game_log(b"league,side\nLEC,Blue\n", &CsvLogOptions::default())
            .expect_err("batch must be rejected");
        assert!(matches!(err, AdapterError::MissingColumn(_)));
    }

    #[test]
    fn absent_optional_columns_are_listed() {
        let parsed = parse_game_log(b"gameid,side\nG1,Red\n", &CsvLogOptions::default()).expect("parse");
        assert_eq!(parsed.rows.len(), 1);
        assert!(parsed.missing_columns.contains(&"league".to_string()));
        assert_eq!(parsed.rows[0].league, None);
    }

    #[test]
    fn lenient_ints() {
        assert_eq!(parse_int("4"), Some(4));
        assert_eq!(parse_int("4.0"), Some(4));
        assert_eq!(parse_int("nan"), None);
        assert_eq!(parse_int("abc"), None);
    }
}
