//! HTTP adapter for the finance service that owns budgets, goals, debts and
//! scheduled payments.

use super::{BudgetService, DebtService, GoalService, NewDebt, PaymentScheduleService};
use crate::error::AssistantError;
use crate::models::{BudgetPeriod, PaymentFrequency};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct FinanceApiClient {
    client: Client,
    base_url: String,
}

impl FinanceApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// POST a JSON body and return the id of the created entity.
    /// A 4xx answer is a rejection of the mutation and carries its reason.
    async fn post_json(&self, path: &str, body: &Value) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);

        if status.is_client_error() {
            let reason = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("the request was rejected")
                .to_string();
            return Err(AssistantError::Execution(reason));
        }

        if !status.is_success() {
            return Err(AssistantError::Collaborator(format!(
                "Finance API returned {} for {}",
                status, path
            )));
        }

        match body.get("id") {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(AssistantError::Collaborator(format!(
                "Finance API response for {} has no entity id",
                path
            ))),
        }
    }
}

#[async_trait]
impl BudgetService for FinanceApiClient {
    async fn upsert_budget(
        &self,
        user_id: Uuid,
        category: &str,
        limit: f64,
        period: BudgetPeriod,
    ) -> Result<String> {
        self.post_json(
            "/budgets",
            &json!({
                "user_id": user_id,
                "category": category,
                "limit": limit,
                "period": period,
            }),
        )
        .await
    }
}

#[async_trait]
impl GoalService for FinanceApiClient {
    async fn create_goal(
        &self,
        user_id: Uuid,
        name: &str,
        target_amount: f64,
        deadline: NaiveDate,
    ) -> Result<String> {
        self.post_json(
            "/goals",
            &json!({
                "user_id": user_id,
                "name": name,
                "target_amount": target_amount,
                "deadline": deadline,
            }),
        )
        .await
    }
}

#[async_trait]
impl DebtService for FinanceApiClient {
    async fn add_debt(&self, user_id: Uuid, debt: &NewDebt) -> Result<String> {
        let mut body = serde_json::to_value(debt)?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("user_id".to_string(), json!(user_id));
        }
        self.post_json("/debts", &body).await
    }
}

#[async_trait]
impl PaymentScheduleService for FinanceApiClient {
    async fn schedule_payment(
        &self,
        user_id: Uuid,
        name: &str,
        amount: f64,
        frequency: PaymentFrequency,
        next_due: NaiveDate,
        auto_track: bool,
    ) -> Result<String> {
        self.post_json(
            "/scheduled-payments",
            &json!({
                "user_id": user_id,
                "name": name,
                "amount": amount,
                "frequency": frequency,
                "next_due": next_due,
                "auto_track": auto_track,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> FinanceApiClient {
        FinanceApiClient::new(server.uri(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_schedule_payment_posts_typed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/scheduled-payments"))
            .and(body_partial_json(json!({
                "name": "Rent",
                "amount": 15000.0,
                "frequency": "monthly",
                "next_due": "2026-11-01",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "sp_42" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .schedule_payment(
                Uuid::new_v4(),
                "Rent",
                15000.0,
                PaymentFrequency::Monthly,
                NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
                false,
            )
            .await
            .unwrap();
        assert_eq!(id, "sp_42");
    }

    #[tokio::test]
    async fn test_numeric_ids_are_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/budgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
            .mount(&server)
            .await;

        let id = client(&server)
            .upsert_budget(Uuid::new_v4(), "Fuel", 3000.0, BudgetPeriod::Monthly)
            .await
            .unwrap();
        assert_eq!(id, "7");
    }

    #[tokio::test]
    async fn test_client_error_carries_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/goals"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({ "error": "a goal named 'Bike' already exists" })),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .create_goal(
                Uuid::new_v4(),
                "Bike",
                80000.0,
                NaiveDate::from_ymd_opt(2027, 6, 30).unwrap(),
            )
            .await
            .unwrap_err();
        match err {
            AssistantError::Execution(reason) => {
                assert_eq!(reason, "a goal named 'Bike' already exists")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_not_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/debts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let debt = NewDebt {
            name: "Car loan".to_string(),
            principal: 500000.0,
            rate: 9.0,
            emi: None,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            tenure_months: Some(60),
        };
        let err = client(&server).add_debt(Uuid::new_v4(), &debt).await.unwrap_err();
        assert!(matches!(err, AssistantError::Collaborator(_)));
    }
}
