use passage_core::{AppError, AppResult};
use passage_domain::ProviderConfig;
use reqwest::Response;
use serde::de::DeserializeOwned;
use url::Url;

/// Reads the optional `baseurl` parameter, falling back to the public endpoint.
pub(crate) fn base_url(config: &ProviderConfig, default: &str) -> AppResult<Url> {
    let raw = config
        .parameter("baseurl")
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(default);

    parse_url(config, raw)
}

pub(crate) fn parse_url(config: &ProviderConfig, raw: &str) -> AppResult<Url> {
    Url::parse(raw.trim()).map_err(|error| {
        AppError::Configuration(format!(
            "provider '{}' has invalid url '{raw}': {error}",
            config.name()
        ))
    })
}

/// Appends percent-encoded path segments to a base url.
pub(crate) fn endpoint<I>(base: &Url, segments: I) -> AppResult<Url>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| AppError::Configuration(format!("url '{base}' cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);

    Ok(url)
}

pub(crate) fn transport_error(operation: &str, error: reqwest::Error) -> AppError {
    AppError::Provider(format!("{operation} transport error: {error}"))
}

/// Turns a non-success response into a provider error carrying the body.
pub(crate) async fn ensure_success(response: Response, operation: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
    Err(AppError::Provider(format!(
        "{operation} failed with status {status}: {body}"
    )))
}

pub(crate) async fn read_json<T>(response: Response, operation: &str) -> AppResult<T>
where
    T: DeserializeOwned,
{
    ensure_success(response, operation)
        .await?
        .json::<T>()
        .await
        .map_err(|error| {
            AppError::Provider(format!(
                "{operation} returned an unreadable body: {error}"
            ))
        })
}
