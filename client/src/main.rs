use clap::{Parser, Subcommand};
use eyre::{eyre, Result};
use log::debug;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(
    about = "A CLI client for the kvs HTTP API",
    bin_name = "kvs",
    name = "kvs-client",
    author,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base URL of the kvs server
    #[arg(long, env = "KVS_HOST", default_value = "http://127.0.0.1:8000")]
    host: String,

    /// Access token sent as `Authorization: Bearer <token>`
    #[arg(long, env = "KVS_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an account
    #[command(arg_required_else_help = true)]
    Register {
        #[arg(value_name = "username")]
        username: String,
        #[arg(value_name = "email")]
        email: String,
        #[arg(value_name = "password")]
        password: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Obtain an access and a refresh token
    #[command(arg_required_else_help = true)]
    Login {
        #[arg(value_name = "username")]
        username: String,
        #[arg(value_name = "password")]
        password: String,
    },
    /// Exchange a refresh token for a new access token
    #[command(arg_required_else_help = true)]
    Refresh {
        #[arg(value_name = "refresh")]
        refresh: String,
    },
    /// List every key and value
    List,
    /// Get value of a key
    #[command(arg_required_else_help = true)]
    Get {
        #[arg(value_name = "key")]
        key: String,
    },
    /// Set the key to a given value
    #[command(arg_required_else_help = true)]
    Set {
        #[arg(value_name = "key")]
        key: String,
        #[arg(value_name = "value")]
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    debug!("parsing cli commands");
    let args = Cli::parse();
    let api = Api::new(args.host.trim_end_matches('/'), args.token);

    match args.command {
        Command::Register {
            username,
            email,
            password,
            first_name,
            last_name,
        } => {
            let body = json!({
                "username": username,
                "email": email,
                "password": password,
                "first_name": first_name.unwrap_or_default(),
                "last_name": last_name.unwrap_or_default(),
            });
            let (_, user) = api.send(Method::POST, "/api/auth/register", Some(body)).await?;
            print_json(&user)?;
        }
        Command::Login { username, password } => {
            let body = json!({ "username": username, "password": password });
            let (_, tokens) = api.send(Method::POST, "/api/auth/token", Some(body)).await?;
            print_json(&tokens)?;
        }
        Command::Refresh { refresh } => {
            let body = json!({ "refresh": refresh });
            let (_, token) = api
                .send(Method::POST, "/api/auth/token/refresh", Some(body))
                .await?;
            print_json(&token)?;
        }
        Command::List => {
            let (_, records) = api.send(Method::GET, "/api/kv", None).await?;
            print_json(&records)?;
        }
        Command::Get { key } => {
            let (_, record) = api.send(Method::GET, &key_path(&key), None).await?;
            match record.get("value").and_then(Value::as_str) {
                Some(value) => println!("{}", value),
                None => print_json(&record)?,
            }
        }
        Command::Set { key, value } => {
            let body = json!({ "value": value });
            let (status, _) = api.send(Method::PUT, &key_path(&key), Some(body)).await?;
            if status == StatusCode::CREATED {
                println!("created");
            } else {
                println!("updated");
            }
        }
    }

    Ok(())
}

struct Api {
    client: Client,
    host: String,
    token: Option<String>,
}

impl Api {
    fn new(host: &str, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            host: host.to_owned(),
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.host, path);
        debug!("{} {}", method, url);

        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = self.request(method, path);
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let value: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            return Err(eyre!("server responded {}: {}", status, value));
        }
        Ok((status, value))
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// keys may hold any character except '/', escape the rest for the URL path
fn key_path(key: &str) -> String {
    format!("/api/kv/{}", urlencoding::encode(key))
}
