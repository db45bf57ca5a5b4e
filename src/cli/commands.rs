use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info};

use crate::auth;
use crate::directory::tokens::{format_token, token_header_line};
use crate::directory::users::{format_user, format_user_line, user_header_line};
use crate::directory::{
    HttpDirectoryClient, RetryPolicy, RevokeOutcome, TokensApi, UserRecord, UsersApi,
};
use crate::logging::{report_log_location, Timer};
use crate::report::orgs::{
    count_org_rows, format_org_counts, summarize_org_counts, write_org_counts,
    ORG_REPORT_FIELDS, ORG_USERS_TEMP_FILE_NAME,
};
use crate::report::tokens::{
    format_client_report, format_scope_report, ranking_rows, TokenReportOptions,
    CLIENT_ID_CSV_HEADER, SCOPE_CSV_HEADER, TOP_CLIENT_IDS_FILE_NAME, TOP_SCOPES_FILE_NAME,
};
use crate::report::users::write_user_report;
use crate::storage::{
    self, Defaults, Settings, WorkingStore, DEFAULT_DOMAIN_FILE_NAME, LOG_FILE_NAME,
    USERS_FILE_NAME,
};
use crate::tokens::gather::GatherSummary;
use crate::tokens::{
    gather_token_stats, read_token_stats, revoke_client_for_domain, summarize_token_stats,
    DomainRevocationOptions, GatherOptions, TokenRevoker,
};
use crate::validators::email_parts;

const LOG_BORDER_WIDTH: usize = 40;

/// Base directory, settings and working store for one domain.
struct Session {
    base_dir: PathBuf,
    settings: Settings,
    store: WorkingStore,
}

impl Session {
    fn open(apps_domain: Option<&str>) -> Result<Self> {
        let base_dir = storage::base_dir()?;
        let settings = storage::load_settings(&base_dir)?;
        let domain = resolve_domain(&base_dir, apps_domain)?;
        let store = WorkingStore::open(&base_dir, &settings, &domain)?;
        Ok(Self {
            base_dir,
            settings,
            store,
        })
    }

    fn domain(&self) -> &str {
        self.store.domain()
    }

    fn secrets_path(&self) -> PathBuf {
        let path = &self.settings.client_secrets_file;
        if path.is_absolute() {
            path.clone()
        } else {
            self.base_dir.join(path)
        }
    }

    fn client(&self) -> Result<HttpDirectoryClient> {
        let token = auth::access_token(&self.store, &self.secrets_path(), false)?;
        let client = HttpDirectoryClient::new(
            &self.settings.api_base_url,
            token,
            Duration::from_secs(self.settings.request_timeout_secs),
        )?;
        Ok(client)
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.settings.max_retries)
    }

    fn page_size(&self) -> u32 {
        self.settings.page_size
    }

    fn log_path(&self) -> PathBuf {
        self.base_dir.join(LOG_FILE_NAME)
    }
}

fn resolve_domain(base_dir: &Path, apps_domain: Option<&str>) -> Result<String> {
    if let Some(domain) = apps_domain {
        return Ok(domain.to_string());
    }
    match storage::read_default_domain(base_dir)? {
        Some(defaults) => Ok(defaults.apps_domain),
        None => bail!(
            "--apps-domain is required. Supply it or save one with `diradmin set-default-domain`."
        ),
    }
}

fn max_results(first_n: usize) -> Option<usize> {
    (first_n > 0).then_some(first_n)
}

fn log_banner(message: &str) {
    info!("{}\n{}", message, "-".repeat(LOG_BORDER_WIDTH));
}

// -- Authorization -------------------------------------------------------------

pub fn cmd_login(apps_domain: Option<&str>) -> Result<()> {
    let session = Session::open(apps_domain)?;
    auth::access_token(&session.store, &session.secrets_path(), true)?;
    eprintln!(
        "Credentials for {} stored in {}.",
        session.domain(),
        session.store.work_dir().display()
    );
    Ok(())
}

pub fn cmd_set_default_domain(apps_domain: Option<&str>, force: bool) -> Result<()> {
    let domain = apps_domain.context("--apps-domain is required for set-default-domain.")?;
    let session = Session::open(Some(domain))?;
    let defaults_path = session.base_dir.join(DEFAULT_DOMAIN_FILE_NAME);
    if defaults_path.is_file() && !force {
        bail!(
            "Output file ({}) already exists. Use --force to overwrite.",
            defaults_path.display()
        );
    }

    let client = session.client()?;
    let users_api = UsersApi::new(&client, session.retry());
    let customer_id = users_api
        .customer_id(domain)
        .with_context(|| format!("Unable to retrieve customer_id for domain {}.", domain))?;
    let path = storage::write_defaults(
        &session.base_dir,
        &Defaults {
            apps_domain: domain.to_string(),
            customer_id,
        },
        force,
    )?;
    println!("Default domain stored in {}.", path.display());
    Ok(())
}

// -- Users ---------------------------------------------------------------------

pub fn cmd_ls_users(apps_domain: Option<&str>, json: bool, first_n: usize, force: bool) -> Result<()> {
    let session = Session::open(apps_domain)?;
    if json {
        session.store.ensure_writable(USERS_FILE_NAME, force)?;
    }
    let client = session.client()?;
    let users_api = UsersApi::new(&client, session.retry());
    let domain = session.domain();
    let context = || format!("Unable to enumerate users from domain {}.", domain);

    if json {
        let users: Vec<UserRecord> = users_api
            .get_domain_users(domain, max_results(first_n), session.page_size(), None)
            .with_context(context)?;
        let path = session.store.write_json(USERS_FILE_NAME, &users, force)?;
        println!("Users list written to {}.", path.display());
        return Ok(());
    }

    println!("Users from domain {}:", domain);
    println!("{}", user_header_line());
    let count = users_api
        .for_each_domain_user(domain, max_results(first_n), session.page_size(), None, |user| {
            println!("{}", format_user_line(&user.id, &user.primary_email, user.full_name()));
        })
        .with_context(context)?;
    println!("{} users found.", count);
    Ok(())
}

pub fn cmd_ls_user(apps_domain: Option<&str>, user_email: &str, long_list: bool) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let client = session.client()?;
    let users_api = UsersApi::new(&client, session.retry());
    let Some(user) = users_api.get_user(user_email)? else {
        bail!("User {} not found.", user_email);
    };
    println!("{}", user_header_line());
    for line in format_user(&user, long_list)? {
        println!("{}", line);
    }
    Ok(())
}

pub fn cmd_add_user(
    apps_domain: Option<&str>,
    user_email: &str,
    first_name: &str,
    last_name: &str,
    password: &str,
) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let (_, email_domain) = email_parts(user_email)?;
    if email_domain != session.domain() {
        bail!(
            "User email ({}) must be in domain {}.",
            user_email,
            session.domain()
        );
    }
    let client = session.client()?;
    let users_api = UsersApi::new(&client, session.retry());
    users_api
        .add_user(first_name, last_name, user_email, password, true)
        .with_context(|| format!("Unable to add user {}.", user_email))?;
    println!("User {} added.", user_email);
    Ok(())
}

pub fn cmd_rm_user(apps_domain: Option<&str>, user_email: &str, force: bool) -> Result<()> {
    if !force {
        bail!(
            "This is a destructive command. Please confirm your intent to remove \
             the user by adding --force."
        );
    }
    let session = Session::open(apps_domain)?;
    let client = session.client()?;
    let users_api = UsersApi::new(&client, session.retry());
    users_api
        .delete_user(user_email, true)
        .with_context(|| format!("Unable to rm user {}.", user_email))?;
    println!("User {} removed.", user_email);
    Ok(())
}

pub fn cmd_ls_customer_id(apps_domain: Option<&str>) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let client = session.client()?;
    let users_api = UsersApi::new(&client, session.retry());
    match users_api.customer_id(session.domain())? {
        Some(customer_id) => println!("Customer ID: {}", customer_id),
        None => println!("No users found in {}; customer id unavailable.", session.domain()),
    }
    Ok(())
}

// -- Reports -------------------------------------------------------------------

pub fn cmd_report_users(
    apps_domain: Option<&str>,
    output_file: &str,
    query_filter: Option<&str>,
    csv_fields: &[String],
    first_n: usize,
    force: bool,
) -> Result<()> {
    let session = Session::open(apps_domain)?;
    session.store.ensure_writable(output_file, force)?;
    let client = session.client()?;
    let users_api = UsersApi::new(&client, session.retry());

    let users = users_api
        .get_domain_users_full(
            session.domain(),
            max_results(first_n),
            session.page_size(),
            query_filter,
        )
        .with_context(|| format!("Unable to enumerate users from domain {}.", session.domain()))?;
    match write_user_report(&session.store, output_file, &users, csv_fields, force)? {
        Some(path) => println!("Wrote user report: {}.", path.display()),
        None => println!("No users returned."),
    }
    Ok(())
}

pub fn cmd_report_org_counts(apps_domain: Option<&str>, csv: bool, force: bool) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let store = &session.store;

    if store.exists(ORG_USERS_TEMP_FILE_NAME) && !force {
        println!("Showing counts from existing file.");
    } else {
        let client = session.client()?;
        let users_api = UsersApi::new(&client, session.retry());
        let users = users_api
            .get_domain_users_full(session.domain(), None, session.page_size(), None)
            .with_context(|| {
                format!("Unable to enumerate users from domain {}.", session.domain())
            })?;
        let fields: Vec<String> = ORG_REPORT_FIELDS.iter().map(|f| f.to_string()).collect();
        if write_user_report(store, ORG_USERS_TEMP_FILE_NAME, &users, &fields, true)?.is_none() {
            println!("No users returned.");
            return Ok(());
        }
    }

    let rows = store.read_csv(ORG_USERS_TEMP_FILE_NAME)?;
    let counts = count_org_rows(&rows)?;
    let (by_active, by_ou) = summarize_org_counts(&counts);
    for line in format_org_counts(&by_active, &by_ou) {
        println!("{}", line);
    }
    if csv {
        for path in write_org_counts(store, by_active, by_ou, force)? {
            println!("Wrote org counts: {}.", path.display());
        }
    }
    Ok(())
}

// -- Tokens for one user -------------------------------------------------------

fn require_domain_user(users_api: &UsersApi<'_, HttpDirectoryClient>, user_email: &str) -> Result<()> {
    if !users_api.is_domain_user(user_email)? {
        bail!("User {} not found.", user_email);
    }
    Ok(())
}

pub fn cmd_ls_tokens_for_user(apps_domain: Option<&str>, user_email: &str, long_list: bool) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let client = session.client()?;
    require_domain_user(&UsersApi::new(&client, session.retry()), user_email)?;

    let tokens_api = TokensApi::new(&client, session.retry());
    let tokens = tokens_api
        .list_tokens_for_user(user_email)
        .with_context(|| format!("Unable to retrieve tokens for user {}.", user_email))?;
    if tokens.is_empty() {
        println!("No tokens found for that user.");
        return Ok(());
    }
    println!("{}", token_header_line());
    for token in &tokens {
        for line in format_token(token, long_list) {
            println!("{}", line);
        }
    }
    Ok(())
}

pub fn cmd_ls_tokens_for_user_clientid(
    apps_domain: Option<&str>,
    user_email: &str,
    client_id: &str,
    long_list: bool,
) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let client = session.client()?;
    require_domain_user(&UsersApi::new(&client, session.retry()), user_email)?;

    let tokens_api = TokensApi::new(&client, session.retry());
    let token = tokens_api
        .get_token(user_email, client_id)
        .with_context(|| format!("Unable to retrieve tokens for user {}.", user_email))?;
    match token {
        Some(token) => {
            println!("{}", token_header_line());
            for line in format_token(&token, long_list) {
                println!("{}", line);
            }
        }
        None => println!("No tokens found for that user and client_id."),
    }
    Ok(())
}

pub fn cmd_revoke_tokens_for_user_clientid(
    apps_domain: Option<&str>,
    user_email: &str,
    client_id: &str,
) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let client = session.client()?;
    require_domain_user(&UsersApi::new(&client, session.retry()), user_email)?;

    let tokens_api = TokensApi::new(&client, session.retry());
    let outcome = tokens_api.delete_token(user_email, client_id).with_context(|| {
        format!(
            "Unable to revoke token for user {} and client_id {}.",
            user_email, client_id
        )
    })?;
    match outcome {
        RevokeOutcome::Revoked => info!(
            "Successfully revoked token for user {} for client_id {}.",
            user_email, client_id
        ),
        RevokeOutcome::NoToken => info!(
            "User {} holds no token for client_id {}.",
            user_email, client_id
        ),
    }
    Ok(())
}

// -- Domain-wide token commands ------------------------------------------------

fn run_gather(
    session: &Session,
    client: &HttpDirectoryClient,
    options: &GatherOptions,
) -> Result<GatherSummary> {
    let users_api = UsersApi::new(client, session.retry());
    let tokens_api = TokensApi::new(client, session.retry());
    let _timer = Timer::start("gather-domain-token-stats", false);
    let summary = gather_token_stats(&session.store, &users_api, &tokens_api, options)
        .context("Unable to gather token records.")?;
    Ok(summary)
}

pub fn cmd_gather_domain_token_stats(
    apps_domain: Option<&str>,
    first_n: usize,
    resume: bool,
    force: bool,
) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let client = session.client()?;
    let summary = run_gather(
        &session,
        &client,
        &GatherOptions {
            resume,
            first_n,
            force,
            page_size: session.page_size(),
            show_progress: true,
        },
    )?;
    println!(
        "Token stats for {} users ({} client/scope pairs) written to {}.",
        summary.users_scanned,
        summary.stat_keys,
        summary.path.display()
    );
    Ok(())
}

pub fn cmd_report_domain_token_status(
    apps_domain: Option<&str>,
    csv: bool,
    options: TokenReportOptions,
    force: bool,
) -> Result<()> {
    let session = Session::open(apps_domain)?;
    let stats = read_token_stats(&session.store)?;
    let (by_client, by_scope) = summarize_token_stats(&stats);
    if by_client.is_empty() {
        println!("No tokens recorded in the token stats file.");
        return Ok(());
    }

    for line in format_client_report(&by_client, &options) {
        println!("{}", line);
    }
    if csv {
        if let Some(path) = session.store.write_csv(
            TOP_CLIENT_IDS_FILE_NAME,
            CLIENT_ID_CSV_HEADER,
            ranking_rows(&by_client, options.top_n),
            force,
        )? {
            println!("Wrote common client ids report: {}.", path.display());
        }
    }

    for line in format_scope_report(&by_scope, &options) {
        println!("{}", line);
    }
    if csv {
        if let Some(path) = session.store.write_csv(
            TOP_SCOPES_FILE_NAME,
            SCOPE_CSV_HEADER,
            ranking_rows(&by_scope, options.top_n),
            force,
        )? {
            println!("Wrote common scopes report: {}.", path.display());
        }
    }
    Ok(())
}

pub fn cmd_revoke_tokens_for_domain_clientid(
    apps_domain: Option<&str>,
    client_id: &str,
    first_n: usize,
    resume: bool,
    use_local_token_stats: bool,
) -> Result<()> {
    let session = Session::open(apps_domain)?;
    log_banner("revoke-tokens-for-domain-clientid starting...");

    let local_stats = if use_local_token_stats {
        Some(read_token_stats(&session.store)?)
    } else {
        None
    };
    let client = session.client()?;
    let users_api = UsersApi::new(&client, session.retry());
    let tokens_api = TokensApi::new(&client, session.retry());

    let summary = revoke_client_for_domain(
        &session.store,
        &users_api,
        &tokens_api,
        client_id,
        &DomainRevocationOptions {
            resume,
            first_n,
            page_size: session.page_size(),
            use_local_token_stats: local_stats,
            show_progress: true,
        },
    )
    .map_err(|e| {
        error!("Unable to revoke tokens for client_id {}.", client_id);
        e
    })?;
    info!(
        "Revocation attempted for {} users ({} held a token).",
        summary.attempted(),
        summary.revoked.len()
    );
    log_banner("revoke-tokens-for-domain-clientid done.");
    report_log_location(&session.log_path());

    if !use_local_token_stats {
        println!(
            "NOTE: To save time, revocation is attempted for all domain users without \
             checking in advance if a token was granted. To log only the client ids of \
             tokens actually held, run gather-domain-token-stats and use \
             --use-local-token-stats with this command."
        );
    }
    Ok(())
}

pub fn cmd_revoke_unapproved_tokens(
    apps_domain: Option<&str>,
    force: bool,
    client_blacklist_file: Option<&str>,
    scope_blacklist_file: Option<&str>,
    use_local_token_stats: bool,
    use_local_users_list: bool,
    hide_timing: bool,
) -> Result<()> {
    if !force {
        bail!(
            "This is a destructive command. Please confirm your intent to \
             irreversibly revoke tokens by adding --force."
        );
    }
    if client_blacklist_file.is_none() && scope_blacklist_file.is_none() {
        bail!("Either --client-blacklist-file or --scope-blacklist-file must be supplied.");
    }

    let session = Session::open(apps_domain)?;
    log_banner("revoke-unapproved-tokens starting...");

    let client = session.client()?;
    let mut revoker = TokenRevoker::new(TokensApi::new(&client, session.retry()), hide_timing);
    if let Some(file) = client_blacklist_file {
        revoker.load_client_blacklist(&session.store, file)?;
    }
    if let Some(file) = scope_blacklist_file {
        revoker.load_scope_blacklist(&session.store, file)?;
    }
    revoker.ensure_blacklists_present()?;

    if !use_local_users_list {
        // A fresh users list is fetched by the gather below.
        session.store.remove(USERS_FILE_NAME)?;
    }
    if !use_local_token_stats {
        run_gather(
            &session,
            &client,
            &GatherOptions {
                force,
                page_size: session.page_size(),
                show_progress: true,
                ..Default::default()
            },
        )?;
    }

    let stats = read_token_stats(&session.store)?;
    let summary = revoker.revoke_unapproved_tokens(&stats)?;
    info!(
        "Revoked {} tokens; {} already gone; {} failed.",
        summary.revoked.len(),
        summary.no_token.len(),
        summary.failed.len()
    );
    log_banner("revoke-unapproved-tokens done.");
    report_log_location(&session.log_path());
    Ok(())
}
