use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use surge_core::metrics::OUTBOUND_REQUESTS_TOTAL;
use surge_core::{AuthSpec, RequestMethod, RequestSample};
use surge_store::SampleSink;

use crate::aggregator::MetricsAggregator;

/// One virtual user: issues requests against a single target at a fixed
/// start rate until cancelled.
///
/// The pacing ticker bounds request *starts* only; slow targets can still
/// accumulate in-flight requests up to the client timeout.
#[derive(Clone)]
pub struct VirtualUser {
    client: reqwest::Client,
    target: String,
    method: RequestMethod,
    body: Option<String>,
    headers: HashMap<String, String>,
    auth: Option<AuthSpec>,
    interval: Duration,
    run_key: i64,
    aggregator: Arc<MetricsAggregator>,
    sink: Arc<SampleSink>,
    cancel: CancellationToken,
}

impl VirtualUser {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: reqwest::Client,
        target: String,
        method: RequestMethod,
        body: Option<String>,
        headers: Option<HashMap<String, String>>,
        auth: Option<AuthSpec>,
        interval: Duration,
        run_key: i64,
        aggregator: Arc<MetricsAggregator>,
        sink: Arc<SampleSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            target,
            method,
            body,
            headers: headers.unwrap_or_default(),
            auth,
            interval,
            run_key,
            aggregator,
            sink,
            cancel,
        }
    }

    /// Runs the paced request loop until the run is cancelled. The first
    /// request fires one pacing period after start.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.issue_once().await,
            }
        }
    }

    async fn issue_once(&self) {
        let started = Instant::now();
        let request = self.build_request();

        // Cancellation aborts the in-flight request; the aborted attempt is
        // not recorded as an outcome.
        let outcome = tokio::select! {
            () = self.cancel.cancelled() => return,
            result = request.send() => result,
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        let completed_at = Utc::now();

        let (success, status_code) = match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                // Drain and release the body so the connection can be
                // reused, whatever the status was.
                let _ = response.bytes().await;
                (status < 400, status)
            }
            Err(err) => {
                debug!(error = %err, target = %self.target, "request failed");
                (false, 0)
            }
        };

        OUTBOUND_REQUESTS_TOTAL
            .with_label_values(&[if success { "success" } else { "error" }])
            .inc();
        self.aggregator.record(latency_ms, success, status_code);
        self.sink.publish(RequestSample {
            run_key: self.run_key,
            completed_at,
            latency_ms,
            success,
            status_code,
        });
    }

    fn build_request(&self) -> reqwest::RequestBuilder {
        let method = match self.method {
            RequestMethod::Get => reqwest::Method::GET,
            RequestMethod::Post => reqwest::Method::POST,
            RequestMethod::Put => reqwest::Method::PUT,
            RequestMethod::Delete => reqwest::Method::DELETE,
            RequestMethod::Patch => reqwest::Method::PATCH,
            RequestMethod::Head => reqwest::Method::HEAD,
            RequestMethod::Options => reqwest::Method::OPTIONS,
        };

        let mut request = self.client.request(method, &self.target);

        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        if let Some(body) = &self.body {
            if self.method.allows_body() {
                if self.method.defaults_json_body() && !self.has_content_type() {
                    request = request.header(CONTENT_TYPE, "application/json");
                }
                request = request.body(body.clone());
            }
        }

        match &self.auth {
            Some(AuthSpec::Jwt { token }) if !token.is_empty() => {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            Some(AuthSpec::Basic { username, password })
                if !username.is_empty() && !password.is_empty() =>
            {
                request = request.basic_auth(username, Some(password));
            }
            Some(AuthSpec::Header {
                name,
                value,
                headers,
            }) => {
                if !name.is_empty() {
                    request = request.header(name, value);
                }
                for (extra_name, extra_value) in headers {
                    request = request.header(extra_name, extra_value);
                }
            }
            _ => {}
        }

        request
    }

    fn has_content_type(&self) -> bool {
        self.headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"))
    }
}
