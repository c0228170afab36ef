use crate::app::Services;
use crate::config::Config;
use crate::listings::{Category, NewListing};
use crate::users::{Role, UserStore};
use std::sync::Arc;

/// Creates isolated Services over a unique temp directory. Each test
/// gets its own directory so parallel tests never collide, and no real
/// data is touched. No embedding key is set, so no workers spawn and the
/// assistant runs in demo mode.
pub fn create_services() -> (Arc<Services>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let base_path = tmp.path().to_str().unwrap();

    let mut config = Config::load_with(base_path).expect("failed to load config");
    config.gemini_api_key = None;

    let services = Services::init(config).expect("failed to init services");
    (Arc::new(services), tmp)
}

pub fn sample_listing(name: &str, category: Category) -> NewListing {
    NewListing {
        name: name.to_string(),
        description: Some(format!("{name} description")),
        address: "Peace Avenue 1".to_string(),
        phone: "+976-11-000000".to_string(),
        website: None,
        email: None,
        category,
        latitude: 47.918,
        longitude: 106.917,
        rating: Some(4.0),
        employees: None,
        founded: None,
    }
}

/// Signs in a user and promotes them to admin, returning their token.
pub fn create_admin(services: &Services, email: &str) -> String {
    let (user, token) = services
        .users
        .sign_in(email, Some("Admin".to_string()))
        .expect("sign_in failed");
    services
        .users
        .set_role(&user.id, Role::Admin)
        .expect("set_role failed")
        .expect("user vanished");
    token
}

#[test]
fn test_init_writes_default_config() {
    let (_services, tmp) = create_services();
    assert!(tmp.path().join("config.yaml").exists());
}

#[test]
fn test_create_and_fetch_listing() {
    let (services, _tmp) = create_services();

    let created = services
        .listings
        .create(sample_listing("Khaan Buuz", Category::Restaurant))
        .unwrap();

    let fetched = services.listings.get(&created.id).unwrap().unwrap();
    assert_eq!(fetched.name, "Khaan Buuz");
    assert_eq!(fetched.category, Category::Restaurant);
    assert!(fetched.embedding.is_none());
}

#[test]
fn test_create_enqueues_nothing_by_itself() {
    // The store is plumbing; only the HTTP layer schedules jobs.
    let (services, _tmp) = create_services();
    services
        .listings
        .create(sample_listing("Quiet Cafe", Category::Restaurant))
        .unwrap();
    assert_eq!(services.queue.pending(), 0);
}

#[test]
fn test_sign_in_then_admin_promotion() {
    let (services, _tmp) = create_services();

    let (user, token) = services
        .users
        .sign_in("alex@example.com", None)
        .unwrap();
    assert_eq!(user.role, Role::User);

    let resolved = services.users.find_by_token(&token).unwrap().unwrap();
    assert_eq!(resolved.id, user.id);

    let promoted = services
        .users
        .set_role(&user.id, Role::Admin)
        .unwrap()
        .unwrap();
    assert_eq!(promoted.role, Role::Admin);

    // the old token still resolves, now with the new role
    let resolved = services.users.find_by_token(&token).unwrap().unwrap();
    assert_eq!(resolved.role, Role::Admin);
}

#[test]
fn test_fresh_token_per_sign_in() {
    let (services, _tmp) = create_services();

    let (first_user, first_token) = services.users.sign_in("b@example.com", None).unwrap();
    let (second_user, second_token) = services.users.sign_in("b@example.com", None).unwrap();

    assert_eq!(first_user.id, second_user.id);
    assert_ne!(first_token, second_token);

    // the superseded token no longer resolves
    assert!(services.users.find_by_token(&first_token).unwrap().is_none());
    assert!(services.users.find_by_token(&second_token).unwrap().is_some());
}
