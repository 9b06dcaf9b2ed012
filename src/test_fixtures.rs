// 🧪 Shared fixtures for unit tests

use crate::schema::DataSchema;

/// A small but complete table schema: a polymorphic transactor family,
/// transactions with repeating groups, and the context tables around them
pub const SCHEMA_YAML: &str = r#"
Transactor:
  attributes: [full_name, transactor_type, reported_state]
  required_attributes: [full_name]
  enum_columns:
    transactor_type: [Lobbyist, Candidate, Vendor, Corporation, Non-profit, Committee, Party]
  reverse_relations:
    address: Address
  reverse_relation_names:
    address: transactor
  child_tables: [Individual, Organization]

Individual:
  parent_table: Transactor
  attributes: [first_name, last_name, occupation, party]
  reverse_relations:
    employer: Membership
  reverse_relation_names:
    employer: member

Organization:
  parent_table: Transactor
  attributes: [naics, sic, stock_symbol]

Transaction:
  attributes: [amount, date, transaction_type, reported_election_year, description, reported_state, donor_id, recipient_id]
  required_attributes: [amount, donor_id, recipient_id]
  enum_columns:
    transaction_type: [Contribution, Expenditure]
  repeating_columns: [date, amount]
  forward_relations:
    donor: Transactor
    recipient: Transactor

Address:
  attributes: [line_one, city, state, zipcode, earliest_known_date, latest_known_date, transactor_id]
  required_attributes: [transactor_id]
  forward_relations:
    transactor: Transactor

Membership:
  attributes: [role, start_date, end_date, member_id, organization_id]
  required_attributes: [member_id, organization_id]
  forward_relations:
    member: Individual
    organization: Organization

Election:
  attributes: [office, district, year, state]

ElectionResult:
  attributes: [votes_received, won, election_id, candidate_id]
  forward_relations:
    election: Election
    candidate: Individual
"#;

/// Headerless Pennsylvania contributions export: latin-1, positional
/// columns, repeating date/amount pair, nested donor and employer paths
pub const PA_CONFIG_YAML: &str = r#"
contributions:
  state_code: PA
  table_name: Transaction
  path_pattern: 'pa/contrib.*\.txt'
  read_csv_params:
    delimiter: ","
    encoding: latin-1
    has_header: false
  state_code_columns: [reported_state]
  column_details:
    - raw_name: FILERID
      standard_name: recipient_id
    - raw_name: CONTRIBUTOR
      standard_name: donor--full_name
    - raw_name: CONTDATE1
      type: date
      standard_name: date-1
      date_format: "%Y%m%d"
    - raw_name: CONTAMT1
      type: float
      standard_name: amount-1
    - raw_name: EMPLOYER
      standard_name: donor--employer--organization--full_name
"#;

/// Arizona filer registry: headered, typed transactors with natural ids
pub const AZ_FILERS_YAML: &str = r#"
filers:
  state_code: AZ
  table_name: Transactor
  path_pattern: 'az/filers.*\.csv'
  column_details:
    - raw_name: Name
      standard_name: full_name
    - raw_name: FilerType
      standard_name: transactor_type
    - raw_name: FilerId
      standard_name: id
"#;

pub fn sample_schema() -> DataSchema {
    DataSchema::from_yaml_str(SCHEMA_YAML).expect("fixture schema should parse")
}
