//! [`Browser`] over the W3C WebDriver HTTP protocol (chromedriver).

use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::browser::{Browser, BrowserError, BrowserResult, ElementId, Locator, WindowHandle};
use crate::session::Launcher;

/// Key W3C uses for element references in JSON payloads.
const ELEMENT_KEY: &str = "element-6066-11e4-a07c-4395a7ffc4ab";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const HIDE_WEBDRIVER_FLAG: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";

/// Starts chrome sessions on a running chromedriver.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    client: Client,
    endpoint: String,
    headless: bool,
}

impl ChromeLauncher {
    pub fn new(endpoint: impl Into<String>, headless: bool) -> crate::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            headless,
        })
    }

    fn capabilities(&self, profile_dir: &Path) -> Value {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--window-size=1920,1080".to_string(),
            "--disable-gpu".to_string(),
            "--enable-unsafe-swiftshader".to_string(),
            "--disable-logging".to_string(),
            "--log-level=3".to_string(),
            format!("--user-data-dir={}", profile_dir.display()),
        ];
        if self.headless {
            args.insert(0, "--headless=new".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-automation"],
                        "useAutomationExtension": false,
                    }
                }
            }
        })
    }
}

impl Launcher for ChromeLauncher {
    type Browser = WebDriver;

    async fn launch(&self, profile_dir: &Path) -> BrowserResult<WebDriver> {
        let url = format!("{}/session", self.endpoint);
        let response = self
            .client
            .post(url)
            .json(&self.capabilities(profile_dir))
            .send()
            .await?;
        let value = unwrap_response(response).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::SessionNotCreated("response carried no sessionId".into()))?
            .to_string();
        debug!("webdriver session {session_id} created");

        let mut driver = WebDriver {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            session_id,
        };
        if let Err(err) = driver.execute(HIDE_WEBDRIVER_FLAG).await {
            // The session exists, so Chrome is already running on the profile dir.
            if let Err(quit_err) = driver.quit().await {
                warn!("Couldn't delete webdriver session {}: {quit_err}", driver.session_id);
            }
            return Err(err);
        }
        Ok(driver)
    }
}

/// One live WebDriver session.
#[derive(Debug)]
pub struct WebDriver {
    client: Client,
    endpoint: String,
    session_id: String,
}

impl WebDriver {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> BrowserResult<Value> {
        let url = if path.is_empty() {
            format!("{}/session/{}", self.endpoint, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.endpoint, self.session_id, path)
        };
        let request = self.client.request(method, url);
        let request = match body {
            Some(body) => request.json(&body),
            None => request,
        };
        unwrap_response(request.send().await?).await
    }

    async fn get(&self, path: &str) -> BrowserResult<Value> {
        self.command(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> BrowserResult<Value> {
        self.command(Method::POST, path, Some(body)).await
    }

    async fn execute(&mut self, script: &str) -> BrowserResult<Value> {
        self.post("execute/sync", json!({ "script": script, "args": [] }))
            .await
    }

    async fn element_flag(&self, element: &ElementId, property: &str) -> BrowserResult<bool> {
        let value = self
            .get(&format!("element/{}/{property}", element.0))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

impl Browser for WebDriver {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.post("url", json!({ "url": url })).await.map(drop)
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        let value = self.get("url").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn find_all(&mut self, locator: &Locator) -> BrowserResult<Vec<ElementId>> {
        let (using, selector) = locator.strategy();
        let value = self
            .post("elements", json!({ "using": using, "value": selector }))
            .await?;
        Ok(value
            .as_array()
            .map(|elements| elements.iter().filter_map(element_id).collect())
            .unwrap_or_default())
    }

    async fn is_interactable(&mut self, element: &ElementId) -> BrowserResult<bool> {
        Ok(self.element_flag(element, "displayed").await?
            && self.element_flag(element, "enabled").await?)
    }

    async fn is_stale(&mut self, element: &ElementId) -> BrowserResult<bool> {
        match self.element_flag(element, "enabled").await {
            Ok(_) => Ok(false),
            Err(BrowserError::StaleElement) | Err(BrowserError::NoSuchElement(_)) => Ok(true),
            Err(err) => Err(err),
        }
    }

    async fn click(&mut self, element: &ElementId) -> BrowserResult<()> {
        self.post(&format!("element/{}/click", element.0), json!({}))
            .await
            .map(drop)
    }

    async fn send_keys(&mut self, element: &ElementId, text: &str) -> BrowserResult<()> {
        self.post(&format!("element/{}/value", element.0), json!({ "text": text }))
            .await
            .map(drop)
    }

    async fn read_text(&mut self, element: &ElementId) -> BrowserResult<String> {
        let value = self.get(&format!("element/{}/text", element.0)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_source(&mut self) -> BrowserResult<String> {
        let value = self.get("source").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn current_window(&mut self) -> BrowserResult<WindowHandle> {
        let value = self.get("window").await?;
        Ok(WindowHandle(value.as_str().unwrap_or_default().to_string()))
    }

    async fn new_window(&mut self) -> BrowserResult<WindowHandle> {
        let value = self.post("window/new", json!({ "type": "tab" })).await?;
        value
            .get("handle")
            .and_then(Value::as_str)
            .map(|handle| WindowHandle(handle.to_string()))
            .ok_or_else(|| BrowserError::Driver {
                code: "unknown error".into(),
                message: "new window response carried no handle".into(),
            })
    }

    async fn switch_to_window(&mut self, handle: &WindowHandle) -> BrowserResult<()> {
        self.post("window", json!({ "handle": handle.0 }))
            .await
            .map(drop)
    }

    async fn close_window(&mut self) -> BrowserResult<()> {
        self.command(Method::DELETE, "window", None).await.map(drop)
    }

    async fn quit(&mut self) -> BrowserResult<()> {
        self.command(Method::DELETE, "", None).await.map(drop)
    }
}

/// Splits a WebDriver reply into its `value` or the mapped error.
async fn unwrap_response(response: reqwest::Response) -> BrowserResult<Value> {
    let status = response.status();
    let mut payload: Value = response.json().await?;
    let value = payload
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);
    if status.is_success() {
        Ok(value)
    } else {
        Err(error_from_wire(&value))
    }
}

fn element_id(value: &Value) -> Option<ElementId> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementId(id.to_string()))
}

/// Maps a W3C error object onto [`BrowserError`].
fn error_from_wire(value: &Value) -> BrowserError {
    let code = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match code.as_str() {
        "invalid session id" => BrowserError::InvalidSession(message),
        "session not created" => BrowserError::SessionNotCreated(message),
        "no such element" => BrowserError::NoSuchElement(message),
        "stale element reference" => BrowserError::StaleElement,
        // chromedriver reports a dead renderer as a generic error.
        "unknown error"
            if message.contains("chrome not reachable") || message.contains("disconnected") =>
        {
            BrowserError::InvalidSession(message)
        }
        _ => BrowserError::Driver { code, message },
    }
}
