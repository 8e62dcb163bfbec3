use muniverse::assets::Upload;
use muniverse::auth::RequestContext;
use muniverse::config::{Backend, Config};
use muniverse::db::models::{NotificationKind, User};
use muniverse::error::AppError;
use muniverse::repos::{NewConference, NewUser};
use muniverse::state::AppState;
use tempfile::TempDir;

fn memory_state() -> (AppState, TempDir) {
    let tmp = TempDir::new().unwrap();
    let mut state = AppState::in_memory(tmp.path().join("static"));
    state.config.auth.bcrypt_cost = 4;
    (state, tmp)
}

fn disk_state(dir: &TempDir, backend: Backend) -> AppState {
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.storage.backend = backend;
    config.auth.bcrypt_cost = 4;
    AppState::open(config).expect("Failed to open store")
}

fn signup(state: &AppState, username: &str) -> User {
    state
        .users()
        .create(
            NewUser {
                username: username.into(),
                name: username.to_uppercase(),
                password: "hunter22".into(),
                password_confirm: "hunter22".into(),
                ..NewUser::default()
            },
            None,
        )
        .expect("Signup failed")
}

fn image(name: &str) -> Upload {
    Upload::new(name, b"\x89PNG".to_vec())
}

fn conference(name: &str) -> NewConference {
    NewConference {
        name: name.into(),
        date: "2026-11-02".into(),
        location: "Lisbon".into(),
        description: "Two days of talks".into(),
        tags: "web, open source".into(),
    }
}

#[test]
fn deleting_a_user_cascades_to_posts_assets_and_edges() {
    let (state, _tmp) = memory_state();
    for name in ["alice", "bob", "carol"] {
        signup(&state, name);
    }
    let alice = RequestContext::user("alice");
    let bob = RequestContext::user("bob");

    let first = state.posts().create(&alice, "one", &image("one.png")).unwrap();
    let second = state.posts().create(&alice, "two", &image("two.png")).unwrap();
    let bobs = state.posts().create(&bob, "mine", &image("mine.png")).unwrap();

    state.graph().toggle_follow(&bob, "alice").unwrap();
    state.graph().toggle_follow(&alice, "carol").unwrap();
    state.graph().toggle_follow(&bob, "carol").unwrap();
    let carol_before = state.users().get("carol").unwrap();

    let deleted = state.users().delete(&alice, "alice").unwrap();
    assert_eq!(deleted.posts_removed, 2);

    assert!(state.users().find("alice").unwrap().is_none());
    for post in [&first, &second] {
        assert!(matches!(state.posts().get(post.id), Err(AppError::NotFound(_))));
        assert!(!state.assets.exists(&post.image));
    }

    // Bob's post and its image are untouched.
    assert_eq!(state.posts().get(bobs.id).unwrap(), bobs);
    assert!(state.assets.exists(&bobs.image));

    let users = state.users().list().unwrap();
    assert!(users
        .iter()
        .all(|u| !u.followers.contains("alice") && !u.following.contains("alice")));

    let carol = state.users().get("carol").unwrap();
    assert_eq!(carol.name, carol_before.name);
    assert_eq!(carol.followers.len(), 1);
    assert!(carol.followers.contains("bob"));
}

#[test]
fn submit_then_approve_publishes_exactly_one_conference() {
    let (state, _tmp) = memory_state();
    let alice = RequestContext::user("alice");
    let admin = RequestContext::admin("root", true);

    let pending = state
        .moderation()
        .submit(&alice, conference("WebConf"), &image("banner.png"))
        .unwrap();
    assert_eq!(state.moderation().list_pending(&admin).unwrap().len(), 1);
    assert!(state.conferences().list().unwrap().is_empty());

    let live = state.moderation().approve(&admin, pending.id).unwrap();
    assert!(state.moderation().list_pending(&admin).unwrap().is_empty());
    let published = state.conferences().list().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, live.id);
    assert_eq!(state.conferences().get(live.id).unwrap().name, "WebConf");
    assert!(state.assets.exists(&live.banner));

    let kinds: Vec<NotificationKind> = state
        .notifications()
        .list(&admin)
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
    assert!(kinds.contains(&NotificationKind::ConferenceSubmitted));
    assert!(kinds.contains(&NotificationKind::ConferenceApproved));
}

#[test]
fn approved_conferences_get_fresh_ids() {
    let (state, _tmp) = memory_state();
    let alice = RequestContext::user("alice");
    let admin = RequestContext::operator();

    let a = state
        .moderation()
        .submit(&alice, conference("A"), &image("a.png"))
        .unwrap();
    let b = state
        .moderation()
        .submit(&alice, conference("B"), &image("b.png"))
        .unwrap();

    let first = state.moderation().approve(&admin, b.id).unwrap();
    state.conferences().delete(&admin, first.id).unwrap();
    let second = state.moderation().approve(&admin, a.id).unwrap();
    assert_ne!(first.id, second.id);
}

#[test]
fn reject_leaves_nothing_behind() {
    let (state, _tmp) = memory_state();
    let admin = RequestContext::operator();
    let pending = state
        .moderation()
        .submit(
            &RequestContext::user("alice"),
            conference("Nope"),
            &image("nope.png"),
        )
        .unwrap();
    assert!(state.assets.exists(&pending.banner));

    state.moderation().reject(&admin, pending.id).unwrap();
    assert!(state.moderation().list_pending(&admin).unwrap().is_empty());
    assert!(state.conferences().list().unwrap().is_empty());
    assert!(!state.assets.exists(&pending.banner));
}

#[test]
fn approval_fails_cleanly_when_banner_cannot_be_moved() {
    let (state, _tmp) = memory_state();
    let admin = RequestContext::operator();
    let pending = state
        .moderation()
        .submit(
            &RequestContext::user("alice"),
            conference("Broken"),
            &image("broken.png"),
        )
        .unwrap();
    std::fs::remove_file(state.assets.resolve(&pending.banner).unwrap()).unwrap();

    let err = state.moderation().approve(&admin, pending.id).unwrap_err();
    assert!(err.is_io_failure());
    assert_eq!(err.status_code(), 500);

    let still_pending = state.moderation().list_pending(&admin).unwrap();
    assert_eq!(still_pending.len(), 1);
    assert_eq!(still_pending[0].id, pending.id);
    assert!(state.conferences().list().unwrap().is_empty());
    assert_eq!(state.notifications().list(&admin).unwrap().len(), 1);
}

#[test]
fn comment_length_limit_is_inclusive() {
    let (state, _tmp) = memory_state();
    let alice = RequestContext::user("alice");
    let post = state.posts().create(&alice, "", &image("p.png")).unwrap();

    let exact = "é".repeat(1000);
    assert!(state.posts().add_comment(&alice, post.id, &exact).is_ok());

    let too_long = "x".repeat(1001);
    assert!(matches!(
        state.posts().add_comment(&alice, post.id, &too_long),
        Err(AppError::Validation(_))
    ));
    assert_eq!(state.posts().get(post.id).unwrap().comments.len(), 1);
}

#[test]
fn json_backend_persists_across_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let state = disk_state(&tmp, Backend::Json);
        signup(&state, "alice");
        signup(&state, "bob");
        state
            .graph()
            .toggle_follow(&RequestContext::user("bob"), "alice")
            .unwrap();
        state
            .posts()
            .create(&RequestContext::user("alice"), "hello", &image("hi.png"))
            .unwrap();
    }
    assert!(tmp.path().join("data").join("users.json").is_file());
    assert!(tmp.path().join("data").join("posts.json").is_file());

    let state = disk_state(&tmp, Backend::Json);
    let alice = state.users().authenticate("alice", "hunter22").unwrap();
    assert!(alice.followers.contains("bob"));
    let feed = state.posts().feed().unwrap();
    assert_eq!(feed.len(), 1);
    assert!(state.assets.exists(&feed[0].image));
}

#[test]
fn sqlite_backend_runs_the_same_flows() {
    let tmp = TempDir::new().unwrap();
    {
        let state = disk_state(&tmp, Backend::Sqlite);
        signup(&state, "alice");
        let forums = state.forums();
        let thread = forums
            .create_thread(
                &RequestContext::user("alice"),
                muniverse::repos::NewThread {
                    title: "Hello, World!!".into(),
                    body: "first".into(),
                    tags: String::new(),
                },
            )
            .unwrap();
        assert_eq!(thread.slug, "hello-world-1");
        forums
            .add_reply(&RequestContext::user("alice"), &thread.slug, "hi")
            .unwrap();
        forums.view_thread(&thread.slug).unwrap();
    }
    assert!(tmp.path().join("muniverse.db").is_file());

    let state = disk_state(&tmp, Backend::Sqlite);
    let view = state.forums().find_thread("1").unwrap();
    assert_eq!(view.thread.replies, 1);
    assert_eq!(view.thread.views, 1);
    assert!(state.integrity().audit().unwrap().is_clean());
}
