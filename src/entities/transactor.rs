// 👤 Transactor - Any party that gives or receives money
// Individuals and organizations share one id space and one root table;
// the concrete shape is a tagged variant, not class dispatch

use crate::reader::Row;
use serde::{Deserialize, Serialize};

/// The two concrete shapes a transactor can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactorKind {
    Individual,
    Organization,
}

impl TransactorKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            TransactorKind::Individual => "Individual",
            TransactorKind::Organization => "Organization",
        }
    }
}

/// Specific roles a transactor can hold in disclosure data. Each role
/// implies whether the transactor is a person or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactorTypeSpecific {
    Lobbyist,
    Candidate,
    Vendor,
    Corporation,
    NonProfit,
    Committee,
    Party,
}

impl TransactorTypeSpecific {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lobbyist" => Some(Self::Lobbyist),
            "candidate" => Some(Self::Candidate),
            "vendor" => Some(Self::Vendor),
            "corporation" => Some(Self::Corporation),
            "non-profit" | "nonprofit" => Some(Self::NonProfit),
            "committee" => Some(Self::Committee),
            "party" => Some(Self::Party),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lobbyist => "Lobbyist",
            Self::Candidate => "Candidate",
            Self::Vendor => "Vendor",
            Self::Corporation => "Corporation",
            Self::NonProfit => "Non-profit",
            Self::Committee => "Committee",
            Self::Party => "Party",
        }
    }

    pub fn implied_kind(&self) -> TransactorKind {
        match self {
            Self::Lobbyist | Self::Candidate => TransactorKind::Individual,
            Self::Vendor
            | Self::Corporation
            | Self::NonProfit
            | Self::Committee
            | Self::Party => TransactorKind::Organization,
        }
    }
}

/// Variant-specific payload carried alongside the shared transactor fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactorDetail {
    Individual {
        first_name: String,
        last_name: String,
        occupation: String,
        party: String,
    },
    Organization {
        naics: String,
        sic: String,
        stock_symbol: String,
    },
}

impl TransactorDetail {
    pub fn kind(&self) -> TransactorKind {
        match self {
            TransactorDetail::Individual { .. } => TransactorKind::Individual,
            TransactorDetail::Organization { .. } => TransactorKind::Organization,
        }
    }
}

/// A transactor row lifted into a typed view for matching and reporting
#[derive(Debug, Clone, PartialEq)]
pub struct TransactorRecord {
    pub id: String,
    pub full_name: String,
    pub transactor_type: Option<TransactorTypeSpecific>,
    pub reported_state: String,
    pub detail: Option<TransactorDetail>,
}

impl TransactorRecord {
    /// `table` is the concrete table the row lives in. Rows from Individual
    /// or Organization carry a variant payload; rows still in the root
    /// table carry none and fall back to the kind their type implies.
    pub fn from_row(table: &str, row: &Row) -> TransactorRecord {
        let get = |key: &str| row.get(key).cloned().unwrap_or_default();
        let detail = match table {
            "Individual" => Some(TransactorDetail::Individual {
                first_name: get("first_name"),
                last_name: get("last_name"),
                occupation: get("occupation"),
                party: get("party"),
            }),
            "Organization" => Some(TransactorDetail::Organization {
                naics: get("naics"),
                sic: get("sic"),
                stock_symbol: get("stock_symbol"),
            }),
            _ => None,
        };
        TransactorRecord {
            id: get("id"),
            full_name: get("full_name"),
            transactor_type: TransactorTypeSpecific::parse(&get("transactor_type")),
            reported_state: get("reported_state"),
            detail,
        }
    }

    /// Concrete kind: the payload decides when present, otherwise the
    /// specific type's implication
    pub fn kind(&self) -> Option<TransactorKind> {
        self.detail
            .as_ref()
            .map(|d| d.kind())
            .or_else(|| self.transactor_type.map(|t| t.implied_kind()))
    }
}
