use platter_core::error::{Error, Result};
use platter_core::mealie::{
    MealPlanResponse, MealieConfig, NewPlanEntry, RecipeDetail, check_status, parse_response,
};
use platter_core::models::{DateWindow, MealId};
use platter_core::service::MealPlanSource;

pub struct MealieClient {
    client: reqwest::Client,
    config: MealieConfig,
    rt: tokio::runtime::Handle,
}

fn request_error(url: &str, err: &reqwest::Error) -> Error {
    tracing::warn!(url, error = %err, "request to Mealie failed");
    Error::RemoteRequest {
        url: url.to_string(),
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

impl MealieClient {
    pub fn new(config: MealieConfig, rt: tokio::runtime::Handle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("platter/{} (meal planner)", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| request_error(&config.base_url, &e))?;
        Ok(Self { client, config, rt })
    }

    pub fn config(&self) -> &MealieConfig {
        &self.config
    }

    /// Send a request and hand back `(status, body)` without judging either.
    async fn send(&self, url: &str, req: reqwest::RequestBuilder) -> Result<(u16, String)> {
        let resp = req
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| request_error(url, &e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| request_error(url, &e))?;
        tracing::debug!(url, status, "Mealie responded");
        Ok((status, body))
    }

    pub async fn meal_plan_async(&self, window: Option<DateWindow>) -> Result<MealPlanResponse> {
        let url = self.config.mealplans_url();
        let mut req = self.client.get(&url);
        if let Some(w) = window {
            req = req.query(&[
                ("start_date", w.start.format("%Y-%m-%d").to_string()),
                ("end_date", w.end.format("%Y-%m-%d").to_string()),
            ]);
        }
        let (status, body) = self.send(&url, req).await?;
        parse_response(&url, status, &body)
    }

    pub async fn recipe_async(&self, slug: &str) -> Result<RecipeDetail> {
        let url = self.config.recipe_api_url(slug);
        let (status, body) = self.send(&url, self.client.get(&url)).await?;
        parse_response(&url, status, &body)
    }

    pub async fn delete_plan_entry_async(&self, id: MealId) -> Result<()> {
        let url = self.config.mealplan_url(id);
        let (status, body) = self.send(&url, self.client.delete(&url)).await?;
        check_status(&url, status, &body)
    }

    pub async fn create_plan_entry_async(&self, entry: &NewPlanEntry) -> Result<()> {
        let url = self.config.mealplans_url();
        let (status, body) = self.send(&url, self.client.post(&url).json(entry)).await?;
        check_status(&url, status, &body)
    }
}

impl MealPlanSource for MealieClient {
    fn config(&self) -> &MealieConfig {
        &self.config
    }

    fn meal_plan(&self, window: Option<DateWindow>) -> Result<MealPlanResponse> {
        self.rt.block_on(self.meal_plan_async(window))
    }

    fn recipe(&self, slug: &str) -> Result<RecipeDetail> {
        self.rt.block_on(self.recipe_async(slug))
    }

    fn delete_plan_entry(&self, id: MealId) -> Result<()> {
        self.rt.block_on(self.delete_plan_entry_async(id))
    }

    fn create_plan_entry(&self, entry: &NewPlanEntry) -> Result<()> {
        self.rt.block_on(self.create_plan_entry_async(entry))
    }
}
