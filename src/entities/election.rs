// 🗳️ Election and ElectionResult - What candidates and committees run in

use crate::reader::Row;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElectionRecord {
    pub id: String,
    pub office: String,
    pub district: String,
    pub year: String,
    pub state: String,
}

impl ElectionRecord {
    pub fn from_row(row: &Row) -> ElectionRecord {
        let get = |key: &str| row.get(key).cloned().unwrap_or_default();
        ElectionRecord {
            id: get("id"),
            office: get("office"),
            district: get("district"),
            year: get("year"),
            state: get("state"),
        }
    }
}

/// One candidate's outcome in one election
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElectionResultRecord {
    pub id: String,
    pub election_id: String,
    pub candidate_id: String,
    pub votes_received: String,
    pub won: String,
}

impl ElectionResultRecord {
    pub fn from_row(row: &Row) -> ElectionResultRecord {
        let get = |key: &str| row.get(key).cloned().unwrap_or_default();
        ElectionResultRecord {
            id: get("id"),
            election_id: get("election_id"),
            candidate_id: get("candidate_id"),
            votes_received: get("votes_received"),
            won: get("won"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_default_empty() {
        let election = ElectionRecord::from_row(&Row::from([
            ("id".to_string(), "e1".to_string()),
            ("office".to_string(), "Governor".to_string()),
            ("year".to_string(), "2022".to_string()),
        ]));
        assert_eq!(election.office, "Governor");
        assert_eq!(election.district, "");

        let result = ElectionResultRecord::from_row(&Row::from([
            ("election_id".to_string(), "e1".to_string()),
            ("candidate_id".to_string(), "c1".to_string()),
        ]));
        assert_eq!(result.election_id, "e1");
        assert_eq!(result.won, "");
    }
}
