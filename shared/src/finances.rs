use chrono::{Datelike, NaiveDate};
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::auth::Session;
use crate::error::TotalsOverflow;
use crate::http;
use crate::store::{DocumentGateway, Record};
use crate::types::{CreateFinanceRecordRequest, FinanceKind, FinancePatch, FinanceRecord};

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotals {
    pub income_cents: i64,
    pub expense_cents: i64,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub total_income_cents: i64,
    pub total_expense_cents: i64,
    pub net_cents: i64,
    pub by_category: BTreeMap<String, CategoryTotals>,
    pub record_count: usize,
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Largest single amount accepted, 10 billion in whole currency units.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000_000;

fn add_to(total: &mut i64, amount: i64) -> Result<(), TotalsOverflow> {
    *total = total.checked_add(amount).ok_or(TotalsOverflow)?;
    Ok(())
}

/// Totals over non-archived records, optionally restricted to one year.
/// Records with an unreadable date are left out of year-restricted totals.
pub fn summarize(records: &[Record<FinanceRecord>], year: Option<i32>) -> Result<FinanceSummary, TotalsOverflow> {
    let mut summary = FinanceSummary {
        year,
        ..Default::default()
    };

    for record in records.iter().filter(|r| !r.data.is_archived) {
        if let Some(year) = year {
            if parse_date(&record.data.date).map(|d| d.year()) != Some(year) {
                continue;
            }
        }

        let amount = record.data.amount_cents;
        let totals = summary
            .by_category
            .entry(record.data.category.clone())
            .or_default();
        match record.data.kind {
            FinanceKind::Income => {
                add_to(&mut summary.total_income_cents, amount)?;
                add_to(&mut totals.income_cents, amount)?;
            }
            FinanceKind::Expense => {
                add_to(&mut summary.total_expense_cents, amount)?;
                add_to(&mut totals.expense_cents, amount)?;
            }
        }
        summary.record_count += 1;
    }

    summary.net_cents = summary
        .total_income_cents
        .checked_sub(summary.total_expense_cents)
        .ok_or(TotalsOverflow)?;
    Ok(summary)
}

fn validate(amount_cents: Option<i64>, date: Option<&str>, category: Option<&str>) -> Result<(), &'static str> {
    if amount_cents.is_some_and(|a| a <= 0) {
        return Err("amountCents must be positive");
    }
    if amount_cents.is_some_and(|a| a > MAX_AMOUNT_CENTS) {
        return Err("amountCents is too large");
    }
    if date.is_some_and(|d| parse_date(d).is_none()) {
        return Err("date must be YYYY-MM-DD");
    }
    if category.is_some_and(|c| c.trim().is_empty()) {
        return Err("category is required");
    }
    Ok(())
}

/// GET /finances/summary[?year=YYYY] - public
pub async fn public_summary(gateway: &DocumentGateway, year: Option<&str>) -> Result<Response<Body>, Error> {
    let year = match year.map(str::parse::<i32>) {
        None => None,
        Some(Ok(year)) => Some(year),
        Some(Err(_)) => return Ok(http::error(StatusCode::BAD_REQUEST, "year must be a number")),
    };

    match gateway.get_all::<FinanceRecord>().await {
        Ok(records) => match summarize(&records, year) {
            Ok(summary) => http::json(StatusCode::OK, &summary),
            Err(e) => {
                tracing::error!(error = %e, records = records.len(), "finance summary failed");
                Ok(http::error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to build summary"))
            }
        },
        Err(e) => Ok(http::store_failure(&e)),
    }
}

/// GET /finances
pub async fn list_records(gateway: &DocumentGateway) -> Result<Response<Body>, Error> {
    let mut records = match gateway.get_all::<FinanceRecord>().await {
        Ok(records) => records,
        Err(e) => return Ok(http::store_failure(&e)),
    };
    records.sort_by(|a, b| b.data.date.cmp(&a.data.date));
    http::json(StatusCode::OK, &records)
}

/// POST /finances
pub async fn create_record(
    gateway: &DocumentGateway,
    session: &Session,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateFinanceRecordRequest = match http::parse_json(body) {
        Ok(req) => req,
        Err(resp) => return Ok(resp),
    };

    if let Err(msg) = validate(Some(req.amount_cents), Some(&req.date), Some(&req.category)) {
        return Ok(http::error(StatusCode::BAD_REQUEST, msg));
    }

    let record = FinanceRecord {
        kind: req.kind,
        category: req.category.trim().to_string(),
        amount_cents: req.amount_cents,
        description: req.description,
        date: req.date,
        date_created: chrono::Utc::now().to_rfc3339(),
        date_updated: None,
        is_archived: false,
    };

    let id = match gateway.put(&record, None).await {
        Ok(id) => id,
        Err(e) => return Ok(http::store_failure(&e)),
    };
    tracing::info!(
        id = %id,
        uid = %session.identity.user_id,
        amount_cents = record.amount_cents,
        "finance record created"
    );

    http::json(StatusCode::CREATED, &Record { id, data: record })
}

/// PATCH /finances/{id}
pub async fn update_record(gateway: &DocumentGateway, id: &str, body: &[u8]) -> Result<Response<Body>, Error> {
    let mut patch: FinancePatch = match http::parse_json(body) {
        Ok(patch) => patch,
        Err(resp) => return Ok(resp),
    };

    if let Err(msg) = validate(patch.amount_cents, patch.date.as_deref(), patch.category.as_deref()) {
        return Ok(http::error(StatusCode::BAD_REQUEST, msg));
    }
    if let Some(category) = patch.category.as_mut() {
        *category = category.trim().to_string();
    }
    patch.date_updated = Some(chrono::Utc::now().to_rfc3339());

    apply(gateway, id, &patch).await
}

/// POST /finances/{id}/archive
pub async fn archive_record(gateway: &DocumentGateway, id: &str) -> Result<Response<Body>, Error> {
    let patch = FinancePatch {
        is_archived: Some(true),
        date_updated: Some(chrono::Utc::now().to_rfc3339()),
        ..Default::default()
    };
    apply(gateway, id, &patch).await
}

/// DELETE /finances/{id}
pub async fn delete_record(gateway: &DocumentGateway, id: &str) -> Result<Response<Body>, Error> {
    match gateway.remove::<FinanceRecord>(id).await {
        Ok(()) => Ok(http::no_content()),
        Err(e) => Ok(http::store_failure(&e)),
    }
}

async fn apply(gateway: &DocumentGateway, id: &str, patch: &FinancePatch) -> Result<Response<Body>, Error> {
    if let Err(e) = gateway.patch::<FinanceRecord>(id, patch).await {
        return Ok(http::store_failure(&e));
    }
    match gateway.get_one::<FinanceRecord>(id).await {
        Ok(Some(record)) => http::json(StatusCode::OK, &record),
        Ok(None) => Ok(http::not_found()),
        Err(e) => Ok(http::store_failure(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use crate::types::Role;
    use serde_json::Value;

    fn record(id: &str, kind: FinanceKind, category: &str, cents: i64, date: &str, archived: bool) -> Record<FinanceRecord> {
        Record {
            id: id.to_string(),
            data: FinanceRecord {
                kind,
                category: category.to_string(),
                amount_cents: cents,
                description: None,
                date: date.to_string(),
                date_created: "2026-01-01T00:00:00Z".to_string(),
                date_updated: None,
                is_archived: archived,
            },
        }
    }

    #[test]
    fn test_summary_totals_and_categories() {
        let records = vec![
            record("1", FinanceKind::Income, "tithes", 500_000, "2026-02-01", false),
            record("2", FinanceKind::Income, "offerings", 120_000, "2026-02-08", false),
            record("3", FinanceKind::Expense, "utilities", 80_000, "2026-02-10", false),
            record("4", FinanceKind::Expense, "utilities", 99_999, "2026-02-11", true),
            record("5", FinanceKind::Income, "tithes", 300_000, "2025-12-28", false),
        ];

        let all = summarize(&records, None).unwrap();
        assert_eq!(all.total_income_cents, 920_000);
        assert_eq!(all.total_expense_cents, 80_000);
        assert_eq!(all.net_cents, 840_000);
        assert_eq!(all.record_count, 4);
        assert_eq!(
            all.by_category.get("tithes"),
            Some(&CategoryTotals {
                income_cents: 800_000,
                expense_cents: 0
            })
        );

        let year = summarize(&records, Some(2026)).unwrap();
        assert_eq!(year.total_income_cents, 620_000);
        assert_eq!(year.net_cents, 540_000);
        assert_eq!(year.record_count, 3);
    }

    #[test]
    fn test_empty_summary_is_zero() {
        let summary = summarize(&[], None).unwrap();
        assert_eq!(summary.net_cents, 0);
        assert!(summary.by_category.is_empty());
    }

    #[test]
    fn test_summary_overflow_is_an_error() {
        let big = i64::MAX / 2 + 1;
        let records = vec![
            record("1", FinanceKind::Income, "legacy", big, "2026-01-01", false),
            record("2", FinanceKind::Income, "legacy", big, "2026-01-02", false),
        ];
        assert!(summarize(&records, None).is_err());

        let records = vec![
            record("1", FinanceKind::Expense, "legacy", i64::MAX, "2026-01-01", false),
            record("2", FinanceKind::Income, "legacy", 0, "2026-01-02", false),
        ];
        assert!(summarize(&records, None).is_ok());
    }

    #[tokio::test]
    async fn test_oversized_stored_amounts_give_500() {
        let harness = Harness::new();
        let gw = &harness.gateway;
        let big = i64::MAX / 2 + 1;
        gw.put(&record("1", FinanceKind::Income, "legacy", big, "2026-01-01", false).data, Some("1"))
            .await
            .unwrap();
        gw.put(&record("2", FinanceKind::Income, "legacy", big, "2026-01-02", false).data, Some("2"))
            .await
            .unwrap();

        let resp = public_summary(gw, None).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_amount_cap_and_category_trim_on_update() {
        let harness = Harness::new();
        let token = harness.user("f1", Role::Finance).await;
        let session = harness.auth.resolve(&token).await.unwrap().unwrap();
        let gw = &harness.gateway;

        let resp = create_record(
            gw,
            &session,
            br#"{"kind":"income","category":"tithes","amountCents":1000000000001,"date":"2026-03-01"}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = create_record(
            gw,
            &session,
            br#"{"kind":"income","category":"tithes","amountCents":500,"date":"2026-03-01"}"#,
        )
        .await
        .unwrap();
        let id = serde_json::from_slice::<Value>(resp.body()).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let resp = update_record(gw, &id, br#"{"category":"  offerings "}"#).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let updated: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(updated["category"], "offerings");

        let resp = update_record(gw, &id, br#"{"amountCents":1000000000001}"#).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_validates_and_summary_reflects_it() {
        let harness = Harness::new();
        let token = harness.user("f1", Role::Finance).await;
        let session = harness.auth.resolve(&token).await.unwrap().unwrap();
        let gw = &harness.gateway;

        let resp = create_record(
            gw,
            &session,
            br#"{"kind":"income","category":"tithes","amountCents":-5,"date":"2026-03-01"}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = create_record(
            gw,
            &session,
            br#"{"kind":"income","category":"tithes","amountCents":25000,"date":"2026-03-01"}"#,
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = public_summary(gw, Some("2026")).await.unwrap();
        let summary: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(summary["totalIncomeCents"], 25000);
        assert_eq!(summary["year"], 2026);

        let resp = public_summary(gw, Some("twenty")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
