// 📫 Address and Membership - Context entities hanging off transactors

use crate::reader::Row;

/// A mailing address attached to a transactor. Used as matching evidence
/// during resolution, never as an identity on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressRecord {
    pub id: String,
    pub transactor_id: String,
    pub line_one: String,
    pub city: String,
    pub state: String,
    pub zipcode: String,
    pub earliest_known_date: String,
    pub latest_known_date: String,
}

impl AddressRecord {
    pub fn from_row(row: &Row) -> AddressRecord {
        let get = |key: &str| row.get(key).cloned().unwrap_or_default();
        AddressRecord {
            id: get("id"),
            transactor_id: get("transactor_id"),
            line_one: get("line_one"),
            city: get("city"),
            state: get("state"),
            zipcode: get("zipcode"),
            earliest_known_date: get("earliest_known_date"),
            latest_known_date: get("latest_known_date"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line_one.is_empty()
            && self.city.is_empty()
            && self.state.is_empty()
            && self.zipcode.is_empty()
    }
}

/// Employment or affiliation between an individual and an organization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipRecord {
    pub id: String,
    pub member_id: String,
    pub organization_id: String,
    pub role: String,
    pub start_date: String,
    pub end_date: String,
}

impl MembershipRecord {
    pub fn from_row(row: &Row) -> MembershipRecord {
        let get = |key: &str| row.get(key).cloned().unwrap_or_default();
        MembershipRecord {
            id: get("id"),
            member_id: get("member_id"),
            organization_id: get("organization_id"),
            role: get("role"),
            start_date: get("start_date"),
            end_date: get("end_date"),
        }
    }
}
