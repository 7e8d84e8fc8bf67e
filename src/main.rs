use clap::Parser;
use tollgate::cleanup::Maintenance;
use tollgate::cli::{
    Args, build_config, build_service, handle_create_user, init_logging, load_jwt_secret,
    open_database,
};
use tollgate::{run_server, shutdown_signal};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let Some(service) = build_service(db, args.auth.clone(), &jwt_secret) else {
        std::process::exit(1);
    };

    if let Some(username) = args.create_user.as_deref() {
        if handle_create_user(&service, username, &args.roles)
            .await
            .is_none()
        {
            std::process::exit(1);
        }
    }

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let config = build_config(service, args.ip_header);
    let maintenance = Maintenance::start(config.service.clone());

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    let result = run_server(config, listener, shutdown_signal()).await;
    maintenance.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
