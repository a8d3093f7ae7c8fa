//! Known-craft hint table
//!
//! Delimited text, one rule per row after a header line:
//!
//! ```text
//! field,value,cot,icon,exclude,name,stale
//! MMSI,366892000,a-f-S-X-M,,false,TACO BOAT,600
//! CALLSIGN,WDC1234,,,true,,
//! ```
//!
//! `name` and `stale` are optional columns. A header with an `MMSI` column
//! instead of `field`/`value` is read as a table of MMSI rules. Blank lines
//! and lines starting with `#` are ignored.

use std::path::Path;

use tracing::info;

use crate::{
    errors::RuleTableError,
    models::{Mmsi, VesselState},
};

/// What a rule compares against
#[derive(Debug, Clone, PartialEq)]
pub enum MatchField {
    Identifier(Mmsi),
    /// Upper-cased, trimmed
    Callsign(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnownCraftRule {
    pub matcher: MatchField,
    pub event_type: Option<String>,
    pub icon: Option<String>,
    /// Display name replacing the vessel's own
    pub callsign: Option<String>,
    pub stale_seconds: Option<u64>,
    pub exclude: bool,
}

impl KnownCraftRule {
    fn matches(&self, state: &VesselState) -> bool {
        match &self.matcher {
            MatchField::Identifier(mmsi) => *mmsi == state.identifier,
            MatchField::Callsign(callsign) => state
                .callsign()
                .is_some_and(|own| own.trim().eq_ignore_ascii_case(callsign)),
        }
    }
}

/// Result of classifying one vessel
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDirective {
    pub include: bool,
    pub event_type_override: Option<String>,
    pub icon_override: Option<String>,
    pub callsign_override: Option<String>,
    pub stale_override: Option<u64>,
}

impl MatchDirective {
    /// No rule matched and nothing is filtered
    pub fn passthrough() -> Self {
        Self {
            include: true,
            event_type_override: None,
            icon_override: None,
            callsign_override: None,
            stale_override: None,
        }
    }
}

impl From<&KnownCraftRule> for MatchDirective {
    fn from(rule: &KnownCraftRule) -> Self {
        Self {
            include: !rule.exclude,
            event_type_override: rule.event_type.clone(),
            icon_override: rule.icon.clone(),
            callsign_override: rule.callsign.clone(),
            stale_override: rule.stale_seconds,
        }
    }
}

/// Ordered rule list, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct KnownCraftMatcher {
    rules: Vec<KnownCraftRule>,
    explicit_only: bool,
}

impl KnownCraftMatcher {
    pub fn new(rules: Vec<KnownCraftRule>, explicit_only: bool) -> Self {
        Self {
            rules,
            explicit_only,
        }
    }

    /// Load and parse the table at `path`. Any malformed row fails the whole load.
    pub fn from_path(path: &Path, explicit_only: bool) -> Result<Self, RuleTableError> {
        let contents = std::fs::read_to_string(path).map_err(|e| RuleTableError::Read {
            path: path.to_path_buf(),
            origin: e.to_string(),
        })?;
        let rules = parse_rules(&contents)?;
        info!(
            "Loaded {} known craft rules from {}",
            rules.len(),
            path.display()
        );
        Ok(Self::new(rules, explicit_only))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching rule wins.
    pub fn classify(&self, state: &VesselState) -> MatchDirective {
        match self.rules.iter().find(|rule| rule.matches(state)) {
            Some(rule) => MatchDirective::from(rule),
            None => MatchDirective {
                include: !self.explicit_only,
                ..MatchDirective::passthrough()
            },
        }
    }
}

/// Column positions resolved from the header line
struct Columns {
    field: Option<usize>,
    value: usize,
    cot: Option<usize>,
    icon: Option<usize>,
    exclude: Option<usize>,
    name: Option<usize>,
    stale: Option<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> Result<Self, RuleTableError> {
        let find = |name: &str| header.iter().position(|h| h.eq_ignore_ascii_case(name));

        let (field, value) = match (find("field"), find("value"), find("mmsi")) {
            (Some(field), Some(value), _) => (Some(field), value),
            (_, _, Some(mmsi)) => (None, mmsi),
            (None, _, None) => return Err(RuleTableError::MissingColumn("field")),
            (Some(_), None, None) => return Err(RuleTableError::MissingColumn("value")),
        };

        // Legacy MMSI tables carry no exclude column.
        let exclude = find("exclude");
        if field.is_some() && exclude.is_none() {
            return Err(RuleTableError::MissingColumn("exclude"));
        }

        Ok(Self {
            field,
            value,
            cot: find("cot"),
            icon: find("icon"),
            exclude,
            name: find("name"),
            stale: find("stale"),
        })
    }
}

/// Parse a whole hint table.
pub fn parse_rules(contents: &str) -> Result<Vec<KnownCraftRule>, RuleTableError> {
    let mut lines = contents
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let Some((header_row, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = Columns::from_header(&split_row(header, header_row)?)?;

    lines
        .map(|(row, line)| parse_row(&columns, &split_row(line, row)?, row))
        .collect()
}

fn parse_row(
    columns: &Columns,
    cells: &[String],
    row: usize,
) -> Result<KnownCraftRule, RuleTableError> {
    let cell = |index: Option<usize>| {
        index
            .and_then(|i| cells.get(i))
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
    };
    let invalid = |message: String| RuleTableError::InvalidRow { row, message };

    let value = cell(Some(columns.value)).ok_or_else(|| invalid("empty match value".to_string()))?;
    let field = match columns.field {
        Some(_) => cell(columns.field).ok_or_else(|| invalid("empty match field".to_string()))?,
        None => "MMSI",
    };

    let matcher = if field.eq_ignore_ascii_case("mmsi") {
        MatchField::Identifier(Mmsi::try_from(value).map_err(|e| invalid(e.to_string()))?)
    } else if field.eq_ignore_ascii_case("callsign") {
        MatchField::Callsign(value.to_uppercase())
    } else {
        return Err(invalid(format!("unknown match field {:?}", field)));
    };

    let exclude = match cell(columns.exclude) {
        None => false,
        Some(flag) => parse_flag(flag).ok_or_else(|| invalid(format!("invalid exclude flag {:?}", flag)))?,
    };
    let stale_seconds = cell(columns.stale)
        .map(|stale| {
            stale
                .parse::<u64>()
                .ok()
                .filter(|seconds| *seconds > 0)
                .ok_or_else(|| invalid(format!("invalid stale seconds {:?}", stale)))
        })
        .transpose()?;

    Ok(KnownCraftRule {
        matcher,
        event_type: cell(columns.cot).map(str::to_string),
        icon: cell(columns.icon).map(str::to_string),
        callsign: cell(columns.name).map(str::to_string),
        stale_seconds,
        exclude,
    })
}

fn parse_flag(flag: &str) -> Option<bool> {
    match flag.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Split one comma-delimited row. Double quotes protect commas; `""` is a
/// literal quote.
fn split_row(line: &str, row: usize) -> Result<Vec<String>, RuleTableError> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if quoted {
        return Err(RuleTableError::InvalidRow {
            row,
            message: "unterminated quote".to_string(),
        });
    }
    cells.push(current);
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::models::VesselIdentity;

    const TABLE: &str = "\
field,value,cot,icon,exclude,name,stale
# harbour patrol
MMSI,123456789,X,,false,,
CALLSIGN,wdc1234,a-f-S-X-M,icons/tug.png,false,\"TUG, ONE\",600
MMSI,987654321,,,true,,
";

    fn state(mmsi: u32, callsign: Option<&str>) -> VesselState {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut state = VesselState::new(Mmsi::try_from(mmsi).unwrap(), now);
        state.identity = callsign.map(|cs| VesselIdentity {
            name: None,
            callsign: Some(cs.to_string()),
            ship_type_code: None,
            destination: None,
            updated_at: now,
        });
        state
    }

    fn matcher(explicit_only: bool) -> KnownCraftMatcher {
        KnownCraftMatcher::new(parse_rules(TABLE).unwrap(), explicit_only)
    }

    #[test]
    fn identifier_rule_overrides_event_type() {
        let directive = matcher(false).classify(&state(123_456_789, None));
        assert!(directive.include);
        assert_eq!(directive.event_type_override.as_deref(), Some("X"));
        assert_eq!(directive.icon_override, None);
    }

    #[test]
    fn callsign_rule_is_case_insensitive() {
        let directive = matcher(false).classify(&state(366_000_001, Some(" WDC1234 ")));
        assert_eq!(directive.event_type_override.as_deref(), Some("a-f-S-X-M"));
        assert_eq!(directive.icon_override.as_deref(), Some("icons/tug.png"));
        assert_eq!(directive.callsign_override.as_deref(), Some("TUG, ONE"));
        assert_eq!(directive.stale_override, Some(600));
    }

    #[test]
    fn exclude_rule() {
        assert!(!matcher(false).classify(&state(987_654_321, None)).include);
    }

    #[test]
    fn first_match_wins() {
        let rules = parse_rules(
            "field,value,cot,icon,exclude\nMMSI,123456789,FIRST,,false\nMMSI,123456789,SECOND,,true\n",
        )
        .unwrap();
        let directive = KnownCraftMatcher::new(rules, false).classify(&state(123_456_789, None));
        assert!(directive.include);
        assert_eq!(directive.event_type_override.as_deref(), Some("FIRST"));
    }

    #[test]
    fn no_match_respects_explicit_only() {
        assert_eq!(
            matcher(false).classify(&state(111_111_111, None)),
            MatchDirective::passthrough()
        );
        assert!(!matcher(true).classify(&state(111_111_111, None)).include);
        assert!(matcher(true).classify(&state(123_456_789, None)).include);
    }

    #[test]
    fn legacy_mmsi_table() {
        let rules = parse_rules("MMSI,NAME,COT,STALE,ICON\n366892000,TACO BOAT,a-f-S-X-M,120,\n").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0].matcher,
            MatchField::Identifier(Mmsi::try_from(366_892_000u32).unwrap())
        );
        assert_eq!(rules[0].callsign.as_deref(), Some("TACO BOAT"));
        assert_eq!(rules[0].stale_seconds, Some(120));
        assert!(!rules[0].exclude);
    }

    #[test]
    fn malformed_tables_fail_with_row() {
        let err = parse_rules("value,cot\n1,X\n").unwrap_err();
        assert!(matches!(err, RuleTableError::MissingColumn("field")));

        let err = parse_rules("field,value,cot,icon\nMMSI,1,X,\n").unwrap_err();
        assert!(matches!(err, RuleTableError::MissingColumn("exclude")));

        let table = "field,value,cot,icon,exclude\nMMSI,123456789,X,,false\n\nMMSI,notanumber,X,,false\n";
        match parse_rules(table).unwrap_err() {
            RuleTableError::InvalidRow { row, .. } => assert_eq!(row, 4),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(parse_rules("field,value,cot,icon,exclude\nIMO,9543756,,,false\n").is_err());
        assert!(parse_rules("field,value,cot,icon,exclude\nMMSI,1,,,maybe\n").is_err());
        assert!(parse_rules("field,value,cot,icon,exclude,name\nMMSI,1,,,false,\"open\n").is_err());
        assert!(parse_rules("field,value,cot,icon,exclude,stale\nMMSI,1,,,false,soon\n").is_err());
    }

    #[test]
    fn empty_table_has_no_rules() {
        assert!(parse_rules("").unwrap().is_empty());
        assert!(parse_rules("field,value,cot,icon,exclude\n").unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = KnownCraftMatcher::from_path(Path::new("/nonexistent/known_craft.csv"), false)
            .unwrap_err();
        assert!(matches!(err, RuleTableError::Read { .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_craft.csv");
        std::fs::write(&path, TABLE).unwrap();

        let matcher = KnownCraftMatcher::from_path(&path, false).unwrap();
        assert_eq!(matcher.len(), 3);
    }
}
