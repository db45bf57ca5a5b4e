use serde_json::Value;

use super::client::ApiError;

const NO_APIS_MESSAGE: &str = "Domain cannot use apis.";
const NO_TOKENS_FOR_CLIENT_MESSAGE: &str = "No tokens exist for the specified client id";

/// Turns an error response into text a domain admin can act on.
///
/// `error.message` from the body is preferred over the raw body. Two
/// statuses get special wording: 403 when the provisioning API is disabled,
/// and the 500 the tokens endpoint sends when a client holds no token.
pub fn parse_http_error(err: &ApiError) -> String {
    match err {
        ApiError::Status { status, url, body } => describe_status(*status, url, body),
        ApiError::Transport(msg) => format!("ERROR: {}", msg),
    }
}

/// Message for one error response; see [`parse_http_error`].
pub fn describe_status(status: u16, url: &str, body: &str) -> String {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|doc| {
        doc.get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    match (status, message.as_deref()) {
        (403, Some(NO_APIS_MESSAGE)) => format!(
            "{}\nYou should check \"Enable provisioning API\" in your Domain \
             Settings->User Settings.",
            NO_APIS_MESSAGE
        ),
        (500, Some(NO_TOKENS_FOR_CLIENT_MESSAGE)) => NO_TOKENS_FOR_CLIENT_MESSAGE.to_string(),
        (_, Some(message)) => format!("ERROR: status={}.\nurl={}.\nmessage={}.", status, url, message),
        (_, None) => format!("ERROR: status={}.\nurl={}.\ncontent={}.", status, url, body),
    }
}

/// The tokens endpoint answers 500 rather than 404 for a client without tokens.
pub fn is_no_tokens_for_client(err: &ApiError) -> bool {
    err.status() == Some(500) && parse_http_error(err) == NO_TOKENS_FOR_CLIENT_MESSAGE
}
