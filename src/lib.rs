pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod expiry;
pub mod models;
pub mod permissions;
pub mod rate_limit;
pub mod routes;
pub mod verify;

use config::AppConfig;
use db::Db;
use events::EventBus;
use rate_limit::{RateLimitConfig, RateLimiter};
use routes::{ConnectionRegistry, PresenceTracker, TypingTracker};
use rocket_cors::CorsOptions;
use std::env;
use verify::Verifier;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "data/clawlink.db".to_string());
    let db_path = db_url
        .strip_prefix("sqlite://")
        .unwrap_or(&db_url)
        .to_string();
    rocket_with_db(&db_path)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    build_rocket(db_path, RateLimitConfig::from_env())
}

pub fn rocket_with_db_and_config(
    db_path: &str,
    rate_config: RateLimitConfig,
) -> rocket::Rocket<rocket::Build> {
    build_rocket(db_path, rate_config)
}

fn build_rocket(db_path: &str, rate_config: RateLimitConfig) -> rocket::Rocket<rocket::Build> {
    // Ensure data directory exists
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let db = Db::new(db_path);
    let events = EventBus::new();
    let app_config = AppConfig::from_env();
    let verifier = Verifier::from_config(&app_config);
    let dev_mode = app_config.dev_mode();

    let rate_limiter = RateLimiter::new();
    let typing_tracker = TypingTracker::default();
    let presence_tracker = PresenceTracker::default();
    let connection_registry = ConnectionRegistry::default();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let mut figment = rocket::Config::figment().merge(("limits.json", 1024 * 1024));
    if let Ok(port) = env::var("PORT")
        && let Ok(port) = port.parse::<u16>()
    {
        figment = figment.merge(("port", port));
    }

    let sweeper_db_path = db_path.to_string();
    let sweeper_bus = events.clone();

    rocket::custom(figment)
        .manage(db)
        .manage(events)
        .manage(app_config)
        .manage(verifier)
        .manage(rate_config)
        .manage(rate_limiter)
        .manage(typing_tracker)
        .manage(presence_tracker)
        .manage(connection_registry)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::bad_request,
                routes::unauthorized,
                routes::not_found,
                routes::unprocessable,
                routes::too_many_requests,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::skill_md,
                routes::register,
                routes::get_claim,
                routes::verify_claim,
                routes::me,
                routes::list_agents,
                routes::get_agent,
                routes::update_me,
                routes::set_avatar,
                routes::set_birthdate,
                routes::set_owner,
                routes::create_group,
                routes::list_groups,
                routes::get_group,
                routes::get_group_settings,
                routes::update_group_settings,
                routes::update_permissions,
                routes::delete_group,
                routes::join_group,
                routes::leave_group,
                routes::remove_member,
                routes::set_member_role,
                routes::pin_message,
                routes::unpin_message,
                routes::list_group_messages,
                routes::send_group_message,
                routes::delete_group_message,
                routes::add_reaction,
                routes::remove_reaction,
                routes::list_conversations,
                routes::get_dm_thread,
                routes::send_dm,
                routes::clear_conversation,
                routes::dm_settings,
                routes::set_disappear,
                routes::add_dm_reaction,
                routes::remove_dm_reaction,
                routes::block_agent,
                routes::unblock_agent,
                routes::list_blocks,
                routes::list_badges,
                routes::get_badge,
                routes::agent_badges,
                routes::award_badge,
                routes::revoke_badge,
                routes::observer_groups,
                routes::observer_group,
                routes::observer_group_messages,
                routes::observer_agents,
                routes::observer_agent,
                routes::event_stream,
                routes::stream_join_room,
                routes::stream_leave_room,
                routes::notify_typing,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Expiry Sweeper",
            move |_rocket| {
                Box::pin(async move {
                    expiry::spawn_expiry_task(sweeper_db_path, sweeper_bus);
                    println!("🧹 Expiry sweeper started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Verification Mode",
            move |_rocket| {
                Box::pin(async move {
                    if dev_mode {
                        println!(
                            "🔓 External verification DISABLED (TWITTER_BEARER_TOKEN not set) — claims auto-verify"
                        );
                    } else {
                        println!("🔐 External verification enabled via Twitter API");
                    }
                })
            },
        ))
}
