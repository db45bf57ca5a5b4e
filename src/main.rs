use clap::{Parser, Subcommand};

mod auth;
mod cli;
mod directory;
mod error;
mod iterator;
mod logging;
mod report;
mod storage;
mod tokens;
mod validators;

use report::tokens::TokenReportOptions;
use report::users::REPORT_USERS_FILE_NAME;
use tokens::revoker::{CLIENT_BLACKLIST_FILE_NAME, SCOPE_BLACKLIST_FILE_NAME};
use validators::FieldList;

#[derive(Parser)]
#[command(
    name = "diradmin",
    version,
    about = "Manage Google Apps domain users and the OAuth tokens they have issued"
)]
struct Cli {
    /// Apps domain to operate on (defaults to the one saved by set-default-domain)
    #[arg(short = 'a', long, global = true, env = "DIRADMIN_APPS_DOMAIN", value_parser = validators::apps_domain)]
    apps_domain: Option<String>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the OAuth flow and cache the credential for the domain
    Login,

    /// List domain users
    LsUsers {
        /// Write the list to users.json instead of the console
        #[arg(long)]
        json: bool,
        /// Only the first n users
        #[arg(long, default_value_t = 0)]
        first_n: usize,
        /// Overwrite an existing users.json
        #[arg(long)]
        force: bool,
    },

    /// Show one user
    LsUser {
        #[arg(short = 'u', long, value_parser = validators::email)]
        user_email: String,
        /// Show every field
        #[arg(short, long)]
        long_list: bool,
    },

    /// Create a domain user
    AddUser {
        #[arg(short = 'u', long, value_parser = validators::email)]
        user_email: String,
        #[arg(short = 'n', long, value_parser = validators::no_whitespace)]
        first_name: String,
        #[arg(short = 'l', long, value_parser = validators::no_whitespace)]
        last_name: String,
        #[arg(short, long, value_parser = validators::no_whitespace)]
        password: String,
    },

    /// Delete a domain user
    RmUser {
        #[arg(short = 'u', long, value_parser = validators::email)]
        user_email: String,
        /// Required: confirms the irreversible delete
        #[arg(long)]
        force: bool,
    },

    /// Print the customer id of the domain
    LsCustomerId,

    /// Save the domain (and its customer id) as the default for all commands
    SetDefaultDomain {
        #[arg(long)]
        force: bool,
    },

    /// Write a csv report of domain users
    ReportUsers {
        #[arg(short, long, default_value = REPORT_USERS_FILE_NAME, value_parser = validators::no_whitespace)]
        output_file: String,
        /// Directory search query, e.g. "orgUnitPath=/Sales"
        #[arg(long)]
        query_filter: Option<String>,
        /// Comma separated columns to keep
        #[arg(long, value_parser = validators::field_list)]
        csv_fields: Option<FieldList>,
        #[arg(long, default_value_t = 0)]
        first_n: usize,
        #[arg(long)]
        force: bool,
    },

    /// Count active and suspended users per org unit
    ReportOrgCounts {
        /// Also write orgs_by_active.csv and orgs_by_ou.csv
        #[arg(long)]
        csv: bool,
        /// Refetch users and overwrite existing output
        #[arg(long)]
        force: bool,
    },

    /// List the tokens a user has issued
    LsTokensForUser {
        #[arg(short = 'u', long, value_parser = validators::email)]
        user_email: String,
        /// Show scopes too
        #[arg(short, long)]
        long_list: bool,
    },

    /// Show the token a user issued to one client
    LsTokensForUserClientid {
        #[arg(short = 'u', long, value_parser = validators::email)]
        user_email: String,
        #[arg(short = 'c', long, value_parser = validators::no_whitespace)]
        client_id: String,
        #[arg(short, long)]
        long_list: bool,
    },

    /// Revoke the token a user issued to one client
    RevokeTokensForUserClientid {
        #[arg(short = 'u', long, value_parser = validators::email)]
        user_email: String,
        #[arg(short = 'c', long, value_parser = validators::no_whitespace)]
        client_id: String,
    },

    /// Collect every user's tokens into tokens_issued.json
    GatherDomainTokenStats {
        #[arg(long, default_value_t = 0)]
        first_n: usize,
        /// Continue an interrupted run
        #[arg(short, long)]
        resume: bool,
        #[arg(long)]
        force: bool,
    },

    /// Rank client ids and scopes from tokens_issued.json
    ReportDomainTokenStatus {
        /// Also write top_client_ids.csv and top_scopes.csv
        #[arg(long)]
        csv: bool,
        /// Show details of client ids and scopes
        #[arg(short, long)]
        long_list: bool,
        /// Show users too (implies --long-list)
        #[arg(short = 'u', long)]
        show_users: bool,
        /// Only the top n entries of each ranking
        #[arg(long, default_value_t = 0)]
        top_n: usize,
        #[arg(long)]
        force: bool,
    },

    /// Revoke one client's tokens for every user in the domain
    RevokeTokensForDomainClientid {
        #[arg(short = 'c', long, value_parser = validators::no_whitespace)]
        client_id: String,
        #[arg(long, default_value_t = 0)]
        first_n: usize,
        #[arg(short, long)]
        resume: bool,
        /// Only try users recorded by gather-domain-token-stats
        #[arg(long)]
        use_local_token_stats: bool,
    },

    /// Revoke every token matching a client or scope blacklist
    RevokeUnapprovedTokens {
        /// Required: confirms the irreversible revocation
        #[arg(long)]
        force: bool,
        #[arg(
            short = 'c',
            long,
            value_name = "FILE",
            num_args = 0..=1,
            default_missing_value = CLIENT_BLACKLIST_FILE_NAME,
            value_parser = validators::no_whitespace,
            help = format!("File in the domain working directory listing client ids, one per line (bare flag: {})", CLIENT_BLACKLIST_FILE_NAME)
        )]
        client_blacklist_file: Option<String>,
        #[arg(
            short = 's',
            long,
            value_name = "FILE",
            num_args = 0..=1,
            default_missing_value = SCOPE_BLACKLIST_FILE_NAME,
            value_parser = validators::no_whitespace,
            help = format!("File in the domain working directory listing scopes, one per line (bare flag: {})", SCOPE_BLACKLIST_FILE_NAME)
        )]
        scope_blacklist_file: Option<String>,
        #[arg(long)]
        use_local_token_stats: bool,
        #[arg(long)]
        use_local_users_list: bool,
        /// Stop logging elapsed times
        #[arg(long)]
        hide_timing: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match storage::base_dir() {
        Ok(base) => logging::init_logger(cli.verbose, &base.join(storage::LOG_FILE_NAME)),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }

    let domain = cli.apps_domain.as_deref();
    let result = match &cli.command {
        Commands::Login => cli::commands::cmd_login(domain),
        Commands::LsUsers {
            json,
            first_n,
            force,
        } => cli::commands::cmd_ls_users(domain, *json, *first_n, *force),
        Commands::LsUser {
            user_email,
            long_list,
        } => cli::commands::cmd_ls_user(domain, user_email, *long_list),
        Commands::AddUser {
            user_email,
            first_name,
            last_name,
            password,
        } => cli::commands::cmd_add_user(domain, user_email, first_name, last_name, password),
        Commands::RmUser { user_email, force } => {
            cli::commands::cmd_rm_user(domain, user_email, *force)
        }
        Commands::LsCustomerId => cli::commands::cmd_ls_customer_id(domain),
        Commands::SetDefaultDomain { force } => {
            cli::commands::cmd_set_default_domain(domain, *force)
        }
        Commands::ReportUsers {
            output_file,
            query_filter,
            csv_fields,
            first_n,
            force,
        } => cli::commands::cmd_report_users(
            domain,
            output_file,
            query_filter.as_deref(),
            csv_fields.as_ref().map(|f| f.0.as_slice()).unwrap_or_default(),
            *first_n,
            *force,
        ),
        Commands::ReportOrgCounts { csv, force } => {
            cli::commands::cmd_report_org_counts(domain, *csv, *force)
        }
        Commands::LsTokensForUser {
            user_email,
            long_list,
        } => cli::commands::cmd_ls_tokens_for_user(domain, user_email, *long_list),
        Commands::LsTokensForUserClientid {
            user_email,
            client_id,
            long_list,
        } => cli::commands::cmd_ls_tokens_for_user_clientid(domain, user_email, client_id, *long_list),
        Commands::RevokeTokensForUserClientid {
            user_email,
            client_id,
        } => cli::commands::cmd_revoke_tokens_for_user_clientid(domain, user_email, client_id),
        Commands::GatherDomainTokenStats {
            first_n,
            resume,
            force,
        } => cli::commands::cmd_gather_domain_token_stats(domain, *first_n, *resume, *force),
        Commands::ReportDomainTokenStatus {
            csv,
            long_list,
            show_users,
            top_n,
            force,
        } => cli::commands::cmd_report_domain_token_status(
            domain,
            *csv,
            TokenReportOptions {
                top_n: *top_n,
                long_list: *long_list,
                show_users: *show_users,
            },
            *force,
        ),
        Commands::RevokeTokensForDomainClientid {
            client_id,
            first_n,
            resume,
            use_local_token_stats,
        } => cli::commands::cmd_revoke_tokens_for_domain_clientid(
            domain,
            client_id,
            *first_n,
            *resume,
            *use_local_token_stats,
        ),
        Commands::RevokeUnapprovedTokens {
            force,
            client_blacklist_file,
            scope_blacklist_file,
            use_local_token_stats,
            use_local_users_list,
            hide_timing,
        } => cli::commands::cmd_revoke_unapproved_tokens(
            domain,
            *force,
            client_blacklist_file.as_deref(),
            scope_blacklist_file.as_deref(),
            *use_local_token_stats,
            *use_local_users_list,
            *hide_timing,
        ),
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
