// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod memory;

pub use memory::{MemoryBinding, SentRequest};

use anyhow::{Context, Result};
use masterdata_app::{FieldValue, RowData, TableKind};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::macros::date;
use time::{Date, Duration, OffsetDateTime, Time};

const COMPANY_PREFIXES: [&str; 12] = [
    "Acme", "Globex", "Initech", "Umbrella", "Stark", "Wayne", "Hooli", "Vandelay", "Cyberdyne",
    "Soylent", "Wonka", "Tyrell",
];

const COMPANY_SUFFIXES: [&str; 6] = ["Inc.", "Corp", "Group", "Holdings", "Labs", "GmbH"];

const CITIES: [(&str, &str); 10] = [
    ("Berlin", "Germany"),
    ("Munich", "Germany"),
    ("Paris", "France"),
    ("Lyon", "France"),
    ("Austin", "USA"),
    ("Chicago", "USA"),
    ("Pune", "India"),
    ("Bengaluru", "India"),
    ("Toronto", "Canada"),
    ("Madrid", "Spain"),
];

const CUSTOMER_STATUSES: [&str; 3] = ["Active", "Prospect", "Inactive"];

const OPPORTUNITY_KINDS: [&str; 6] = [
    "Renewal",
    "Expansion",
    "Migration",
    "Support Extension",
    "Pilot",
    "Modernization",
];

const STAGES: [&str; 5] = ["Qualify", "Develop", "Propose", "Negotiate", "Closed Won"];

const PROJECT_STATUSES: [&str; 4] = ["Planned", "Active", "On Hold", "Completed"];

const TECH_STACKS: [&str; 6] = [
    "SAP BTP",
    "CAP Node.js",
    "S/4HANA",
    "Rust",
    "Java Spring",
    "React",
];

const FIRST_NAMES: [&str; 12] = [
    "Ada", "Grace", "Linus", "Margaret", "Ken", "Barbara", "Dennis", "Frances", "Alan", "Radia",
    "Edsger", "Katherine",
];

const LAST_NAMES: [&str; 12] = [
    "Lovelace", "Hopper", "Torvalds", "Hamilton", "Thompson", "Liskov", "Ritchie", "Allen",
    "Turing", "Perlman", "Dijkstra", "Johnson",
];

const SKILLS: [&str; 6] = [
    "ABAP",
    "Fiori",
    "Integration",
    "Data Migration",
    "Rust",
    "Project Management",
];

const EMPLOYEE_STATUSES: [&str; 3] = ["Billable", "Bench", "On Leave"];

const REFERENCE_DATE: Date = date!(2026 - 01 - 01);

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }
}

/// Seeded generator of plausible master-data rows.
#[derive(Debug, Clone)]
pub struct DemoFaker {
    rng: DeterministicRng,
}

impl DemoFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
        }
    }

    pub fn customer(&mut self, index: usize) -> RowData {
        let (city, country) = CITIES[self.rng.int_n(CITIES.len())];
        RowData::new()
            .with("sapcustId", FieldValue::text(format!("cust-{index:04}")))
            .with(
                "sfdccustomerId",
                FieldValue::Integer(10_000 + self.int_range(0, 89_999)),
            )
            .with(
                "name",
                FieldValue::text(format!(
                    "{} {}",
                    self.pick(&COMPANY_PREFIXES),
                    self.pick(&COMPANY_SUFFIXES)
                )),
            )
            .with("city", FieldValue::text(city))
            .with("country", FieldValue::text(country))
            .with("status", FieldValue::text(self.pick(&CUSTOMER_STATUSES)))
            .with("verticalId", FieldValue::Integer(self.int_range(1, 6)))
    }

    pub fn opportunity(&mut self, index: usize, customer: &RowData) -> RowData {
        let start = REFERENCE_DATE + Duration::days(self.int_range(0, 300));
        let end = start + Duration::days(self.int_range(30, 180));
        let customer_name = customer.value("name").display();
        RowData::new()
            .with("oppId", FieldValue::text(format!("opp-{index:04}")))
            .with("customerId", customer.value("sfdccustomerId").clone())
            .with(
                "oppNumber",
                FieldValue::text(format!("OPP-2026-{:05}", self.int_range(1, 99_999))),
            )
            .with(
                "name",
                FieldValue::text(format!("{customer_name} {}", self.pick(&OPPORTUNITY_KINDS))),
            )
            .with("stage", FieldValue::text(self.pick(&STAGES)))
            .with(
                "probability",
                FieldValue::Decimal(self.int_range(2, 18) as f64 / 20.0),
            )
            .with("expectedStart", FieldValue::Date(start))
            .with("expectedEnd", FieldValue::Date(end))
    }

    pub fn project(&mut self, index: usize, opportunity: &RowData) -> RowData {
        let first = self.pick(&FIRST_NAMES).to_lowercase();
        let last = self.pick(&LAST_NAMES).to_lowercase();
        RowData::new()
            .with("projectId", FieldValue::text(format!("prj-{index:04}")))
            .with("oppId", opportunity.value("oppId").clone())
            .with(
                "name",
                FieldValue::text(format!("{} delivery", opportunity.value("name").display())),
            )
            .with("status", FieldValue::text(self.pick(&PROJECT_STATUSES)))
            .with(
                "createdBy",
                FieldValue::text(format!("{first}.{last}@example.com")),
            )
            .with("techStack", FieldValue::text(self.pick(&TECH_STACKS)))
    }

    pub fn sap_status(&mut self, index: usize, project: Option<&RowData>) -> RowData {
        let seen = REFERENCE_DATE.with_time(Time::MIDNIGHT).assume_utc()
            + Duration::minutes(self.int_range(0, 60 * 24 * 300));
        RowData::new()
            .with("sapId", FieldValue::text(format!("SAP{index:06}")))
            .with(
                "currentProjectId",
                project.map_or(FieldValue::Null, |row| row.value("projectId").clone()),
            )
            .with("lastSeen", FieldValue::DateTime(seen))
    }

    pub fn employee(&mut self, index: usize, sap_id: &FieldValue) -> RowData {
        let first = self.pick(&FIRST_NAMES);
        let last = self.pick(&LAST_NAMES);
        let manager = format!("{} {}", self.pick(&FIRST_NAMES), self.pick(&LAST_NAMES));
        RowData::new()
            .with("ohrId", FieldValue::Integer(700_000 + index as i64))
            .with("sapId", sap_id.clone())
            .with("firstName", FieldValue::text(first))
            .with("lastName", FieldValue::text(last))
            .with(
                "email",
                FieldValue::text(format!(
                    "{}.{}@example.com",
                    first.to_lowercase(),
                    last.to_lowercase()
                )),
            )
            .with(
                "costCenter",
                FieldValue::text(format!("CC-{:03}", self.int_range(100, 999))),
            )
            .with("skillSet", FieldValue::text(self.pick(&SKILLS)))
            .with("status", FieldValue::text(self.pick(&EMPLOYEE_STATUSES)))
            .with("manager", FieldValue::text(manager))
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }

    fn int_range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = (max - min + 1) as u64;
        min + (self.rng.next_u64() % span) as i64
    }
}

/// Related rows for all five tables, keyed so the lists cross-reference.
pub fn demo_dataset(seed: u64) -> BTreeMap<TableKind, Vec<RowData>> {
    let mut faker = DemoFaker::new(seed);
    let customers: Vec<_> = (1..=8).map(|index| faker.customer(index)).collect();
    let opportunities: Vec<_> = (1..=12)
        .map(|index| {
            let customer = &customers[(index - 1) % customers.len()];
            faker.opportunity(index, customer)
        })
        .collect();
    let projects: Vec<_> = (1..=6)
        .map(|index| faker.project(index, &opportunities[(index - 1) * 2]))
        .collect();
    let statuses: Vec<_> = (1..=10)
        .map(|index| faker.sap_status(index, projects.get(index - 1)))
        .collect();
    let employees: Vec<_> = statuses
        .iter()
        .enumerate()
        .map(|(index, status)| faker.employee(index + 1, status.value("sapId")))
        .collect();

    BTreeMap::from([
        (TableKind::Customers, customers),
        (TableKind::Opportunities, opportunities),
        (TableKind::Projects, projects),
        (TableKind::SapIdStatuses, statuses),
        (TableKind::Employees, employees),
    ])
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("masterdata.db");
    Ok((dir, db_path))
}

pub fn fixture_datetime() -> OffsetDateTime {
    REFERENCE_DATE.with_time(Time::MIDNIGHT).assume_utc() + Duration::hours(12)
}

#[cfg(test)]
mod tests {
    use super::{DemoFaker, demo_dataset};
    use masterdata_app::{TableKind, default_properties, missing_required_fields};
    use std::collections::BTreeSet;

    #[test]
    fn same_seed_same_rows() {
        let mut left = DemoFaker::new(42);
        let mut right = DemoFaker::new(42);
        assert_eq!(left.customer(1), right.customer(1));
    }

    #[test]
    fn demo_rows_satisfy_required_fields() {
        let dataset = demo_dataset(7);
        for table in TableKind::ALL {
            let properties = default_properties(table);
            let rows = &dataset[&table];
            assert!(!rows.is_empty(), "{table} has no demo rows");
            for row in rows {
                assert!(
                    missing_required_fields(row, &properties).is_empty(),
                    "{table} row {row:?}"
                );
            }
        }
    }

    #[test]
    fn demo_keys_are_unique() {
        let dataset = demo_dataset(11);
        for table in TableKind::ALL {
            let keys: BTreeSet<_> = dataset[&table]
                .iter()
                .map(|row| row.value(table.key_property()).display())
                .collect();
            assert_eq!(keys.len(), dataset[&table].len(), "{table}");
        }
    }

    #[test]
    fn probabilities_stay_in_range() {
        let mut faker = DemoFaker::new(3);
        let customer = faker.customer(1);
        for index in 1..50 {
            let opportunity = faker.opportunity(index, &customer);
            let masterdata_app::FieldValue::Decimal(probability) =
                opportunity.value("probability")
            else {
                panic!("probability should be decimal");
            };
            assert!((0.1..=0.9).contains(probability));
        }
    }
}
