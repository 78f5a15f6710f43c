use crate::error::Error;
use crate::mail::ContactMessage;
use crate::model::{Flash, RatingInput};
use crate::ratings::MAX_RATING;
use crate::session::{CookieAction, SessionContext};
use crate::state::AppState;
use actix_identity::Identity;
use actix_web::{error, http::header, web, HttpResponse};
use log::debug;
use serde::Deserialize;

type Tera = web::Data<tera::Tera>;
type State = web::Data<AppState>;

pub const SESSION_COOKIE: &str = "rater-session";

pub fn templates() -> Result<tera::Tera, tera::Error> {
    tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
}

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    log::error!("{:?}", err);
    error::ErrorInternalServerError(message)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, location))
        .finish()
}

fn render(tera: &tera::Tera, view: &str, ctx: &tera::Context) -> actix_web::Result<HttpResponse> {
    let body = tera
        .render(view, ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body))
}

fn apply(id: &Identity, action: CookieAction) {
    match action {
        CookieAction::Keep => {}
        CookieAction::Remember(token) => id.remember(token),
        CookieAction::Forget => id.forget(),
    }
}

/// Validation errors are shown under `intro`; everything else only reaches the log.
fn flash_error(session: &mut SessionContext, intro: &str, err: Error) {
    match err {
        Error::Validation(message) => {
            session.set_flash(Flash::danger(intro, &message));
        }
        err => {
            log::error!("{:?}", err);
            session.set_flash(Flash::failure());
        }
    }
}

fn recover<T>(session: &mut SessionContext, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            flash_error(session, "Error! ", err);
            None
        }
    }
}

enum Outcome {
    Render(&'static str),
    Redirect(&'static str),
}

/// Loads the session, runs `f` against it on the blocking pool, commits the
/// session and turns the outcome into a response. Rendered pages consume the
/// pending flash.
async fn respond<F>(state: State, id: Identity, tera: Tera, f: F) -> actix_web::Result<HttpResponse>
where
    F: FnOnce(&AppState, &mut SessionContext, &mut tera::Context) -> Outcome + Send + 'static,
{
    let token = id.identity();
    let (action, outcome, ctx) = state
        .run(move |app| {
            let mut session = app.sessions.load(token.as_deref())?;
            let mut ctx = tera::Context::new();
            let outcome = f(app, &mut session, &mut ctx);
            if let Outcome::Render(_) = outcome {
                ctx.insert("authenticated", &session.is_authenticated());
                ctx.insert("flash", &session.take_flash());
            }
            let action = app.sessions.commit(&mut session)?;
            Ok((action, outcome, ctx))
        })
        .await
        .map_err(|err| log_error(err, "Service unavailable"))?;
    apply(&id, action);
    match outcome {
        Outcome::Render(view) => render(&tera, view, &ctx),
        Outcome::Redirect(location) => Ok(redirect(location)),
    }
}

async fn index(id: Identity, state: State, tera: Tera) -> actix_web::Result<HttpResponse> {
    respond(state, id, tera, |app, session, ctx| {
        let users = recover(session, app.ratings.list_users()).unwrap_or_default();
        ctx.insert("users", &users);
        Outcome::Render("home.html")
    })
    .await
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SearchParams {
    search: String,
}

async fn search(
    params: web::Form<SearchParams>,
    id: Identity,
    state: State,
    tera: Tera,
) -> actix_web::Result<HttpResponse> {
    let query = params.into_inner().search;
    respond(state, id, tera, move |app, session, ctx| {
        let results =
            recover(session, app.search.search_by_movie_name(&query)).unwrap_or_default();
        ctx.insert("results", &results);
        ctx.insert("searched_name", &query);
        Outcome::Render("search.html")
    })
    .await
}

async fn register(id: Identity, state: State, tera: Tera) -> actix_web::Result<HttpResponse> {
    respond(state, id, tera, |_, _, _| Outcome::Render("register.html")).await
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RegisterParams {
    username: String,
    email: String,
    password: String,
}

async fn register_post(
    params: web::Form<RegisterParams>,
    id: Identity,
    state: State,
    tera: Tera,
) -> actix_web::Result<HttpResponse> {
    let params = params.into_inner();
    respond(state, id, tera, move |app, session, _| {
        match app.auth.register(
            session,
            params.username.trim(),
            params.email.trim(),
            &params.password,
        ) {
            Ok(_) => Outcome::Redirect("/ratings"),
            Err(_) => Outcome::Redirect("/register"),
        }
    })
    .await
}

async fn login(id: Identity, state: State, tera: Tera) -> actix_web::Result<HttpResponse> {
    respond(state, id, tera, |_, _, _| Outcome::Render("login.html")).await
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoginParams {
    username: String,
    password: String,
}

async fn login_post(
    params: web::Form<LoginParams>,
    id: Identity,
    state: State,
    tera: Tera,
) -> actix_web::Result<HttpResponse> {
    let params = params.into_inner();
    respond(state, id, tera, move |app, session, _| {
        match app
            .auth
            .login(session, params.username.trim(), &params.password)
        {
            Ok(_) => Outcome::Redirect("/ratings"),
            Err(_) => Outcome::Redirect("/login"),
        }
    })
    .await
}

async fn logout(id: Identity, state: State, tera: Tera) -> actix_web::Result<HttpResponse> {
    respond(state, id, tera, |app, session, _| {
        app.auth.logout(session);
        Outcome::Redirect("/")
    })
    .await
}

async fn ratings(id: Identity, state: State, tera: Tera) -> actix_web::Result<HttpResponse> {
    respond(state, id, tera, |app, session, ctx| {
        match app.auth.current_principal(session) {
            Ok(Some(user)) => {
                ctx.insert("user", &user);
                ctx.insert("max_rating", &MAX_RATING);
                Outcome::Render("ratings.html")
            }
            Ok(None) => Outcome::Redirect("/login"),
            Err(err) => {
                flash_error(session, "Error! ", err);
                Outcome::Redirect("/")
            }
        }
    })
    .await
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RatingParams {
    name: String,
    url: String,
    rating: String,
    comment: String,
}

impl RatingParams {
    fn into_input(self) -> Result<RatingInput, Error> {
        let rating = self.rating.trim().parse().map_err(|_| {
            Error::Validation(format!(
                "The rating must be a whole number between 0 and {}.",
                MAX_RATING
            ))
        })?;
        Ok(RatingInput {
            name: self.name,
            url: Some(self.url),
            rating,
            comment: Some(self.comment),
        })
    }
}

async fn ratings_post(
    params: web::Form<RatingParams>,
    id: Identity,
    state: State,
    tera: Tera,
) -> actix_web::Result<HttpResponse> {
    let params = params.into_inner();
    respond(state, id, tera, move |app, session, _| {
        let owner = match session.principal() {
            Some(owner) => owner.to_owned(),
            None => return Outcome::Redirect("/login"),
        };
        match params
            .into_input()
            .and_then(|input| app.ratings.add_rating(&owner, input))
        {
            Ok(rating) => debug!("{} rated {:?} with {}", owner, rating.name, rating.rating),
            Err(Error::NotFound(_)) => {
                session.clear();
                return Outcome::Redirect("/login");
            }
            Err(err) => flash_error(session, "Invalid rating! ", err),
        }
        Outcome::Redirect("/ratings")
    })
    .await
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DeleteParams {
    check: String,
}

async fn delete(
    params: web::Form<DeleteParams>,
    id: Identity,
    state: State,
    tera: Tera,
) -> actix_web::Result<HttpResponse> {
    // An id that does not parse cannot belong to the owner: nothing to remove.
    let rating_id = params.check.trim().parse::<u64>().ok();
    respond(state, id, tera, move |app, session, _| {
        let owner = match session.principal() {
            Some(owner) => owner.to_owned(),
            None => return Outcome::Redirect("/login"),
        };
        let result = match rating_id {
            Some(rating_id) => app.ratings.remove_rating(&owner, rating_id),
            None => Ok(false),
        };
        match result {
            Ok(removed) => debug!("{} removed {:?}: {}", owner, rating_id, removed),
            Err(Error::NotFound(_)) => {
                session.clear();
                return Outcome::Redirect("/login");
            }
            Err(err) => flash_error(session, "Invalid rating! ", err),
        }
        Outcome::Redirect("/ratings")
    })
    .await
}

async fn contact(id: Identity, state: State, tera: Tera) -> actix_web::Result<HttpResponse> {
    respond(state, id, tera, |_, _, _| Outcome::Render("contact.html")).await
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ContactParams {
    email: String,
    subject: String,
    message: String,
}

async fn contact_post(
    params: web::Form<ContactParams>,
    id: Identity,
    state: State,
    tera: Tera,
) -> actix_web::Result<HttpResponse> {
    let params = params.into_inner();
    let message = ContactMessage {
        from: params.email,
        subject: params.subject,
        message: params.message,
    };
    respond(state, id, tera, move |app, session, _| {
        match app.mailer.send(&message) {
            Ok(()) => Outcome::Redirect("/success"),
            Err(err) => {
                flash_error(session, "Message not sent! ", err);
                Outcome::Redirect("/contact")
            }
        }
    })
    .await
}

async fn success(id: Identity, state: State, tera: Tera) -> actix_web::Result<HttpResponse> {
    respond(state, id, tera, |_, _, _| Outcome::Render("success.html")).await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/", web::post().to(search))
        .route("/register", web::get().to(register))
        .route("/register", web::post().to(register_post))
        .route("/login", web::get().to(login))
        .route("/login", web::post().to(login_post))
        .route("/ratings", web::get().to(ratings))
        .route("/ratings", web::post().to(ratings_post))
        .route("/delete", web::post().to(delete))
        .route("/logout", web::get().to(logout))
        .route("/contact", web::get().to(contact))
        .route("/contact", web::post().to(contact_post))
        .route("/success", web::get().to(success));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::LogMailer;
    use crate::model::Rating;
    use actix_identity::{CookieIdentityPolicy, IdentityService};
    use actix_web::cookie::Cookie;
    use actix_web::dev::ServiceResponse;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> AppState {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let mailer = Arc::new(LogMailer::new("contact@localhost".to_owned()));
        AppState::open(
            db,
            4,
            Duration::from_secs(10),
            Duration::from_secs(3600),
            mailer,
        )
        .unwrap()
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .wrap(IdentityService::new(
                        CookieIdentityPolicy::new(&[0; 32])
                            .name(SESSION_COOKIE)
                            .secure(false),
                    ))
                    .app_data(web::Data::new($state))
                    .app_data(web::Data::new(templates().unwrap()))
                    .configure(configure),
            )
            .await
        };
    }

    fn session_cookie<B>(resp: &ServiceResponse<B>) -> Option<Cookie<'static>> {
        resp.response()
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| cookie.into_owned())
    }

    fn location<B>(resp: &ServiceResponse<B>) -> String {
        resp.headers()
            .get(header::LOCATION)
            .expect("not a redirect")
            .to_str()
            .unwrap()
            .to_owned()
    }

    fn names(ratings: &[Rating]) -> Vec<&str> {
        ratings.iter().map(|rating| rating.name.as_str()).collect()
    }

    #[::core::prelude::v1::test]
    fn error_flash_intro() {
        let mut session = SessionContext::anonymous();
        flash_error(
            &mut session,
            "Message not sent! ",
            Error::Validation("An address is required.".to_owned()),
        );
        let flash = session.take_flash().unwrap();
        assert_eq!(flash.intro, "Message not sent! ");
        assert_eq!(flash.message, "An address is required.");

        flash_error(&mut session, "Invalid rating! ", Error::Timeout);
        let flash = session.take_flash().unwrap();
        assert_eq!(flash, Flash::failure());
    }

    #[actix_rt::test]
    async fn ratings_require_login() {
        let app = app!(state());
        let req = test::TestRequest::get().uri("/ratings").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/login");

        let req = test::TestRequest::post()
            .uri("/ratings")
            .set_form(&[("name", "Dune"), ("rating", "9")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/login");
    }

    #[actix_rt::test]
    async fn rating_lifecycle() {
        let state = state();
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/register")
            .set_form(&[
                ("username", "alice"),
                ("email", "alice@example.com"),
                ("password", "secret"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/ratings");
        let cookie = session_cookie(&resp).expect("no session cookie");

        let req = test::TestRequest::get()
            .uri("/ratings")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("you are now registered!"));
        assert!(body.contains("alice"));

        for form in &[
            vec![
                ("name", "Dune"),
                ("url", "https://example.com/dune.jpg"),
                ("rating", "9"),
                ("comment", "great"),
            ],
            vec![("name", "Cats"), ("rating", "2")],
        ] {
            let req = test::TestRequest::post()
                .uri("/ratings")
                .cookie(cookie.clone())
                .set_form(form)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(location(&resp), "/ratings");
        }
        let ratings = state.ratings.list_ratings("alice").unwrap();
        assert_eq!(names(&ratings), vec!["Dune", "Cats"]);
        assert_eq!(ratings[0].rating, 9);
        assert_eq!(ratings[1].rating, 2);

        let req = test::TestRequest::post()
            .uri("/delete")
            .cookie(cookie.clone())
            .set_form(&[("check", ratings[0].id.to_string())])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/ratings");
        let ratings = state.ratings.list_ratings("alice").unwrap();
        assert_eq!(names(&ratings), vec!["Cats"]);

        let req = test::TestRequest::post()
            .uri("/ratings")
            .cookie(cookie.clone())
            .set_form(&[("name", "Heat"), ("rating", "11")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/ratings");
        assert_eq!(state.ratings.list_ratings("alice").unwrap().len(), 1);

        let req = test::TestRequest::get()
            .uri("/ratings")
            .cookie(cookie.clone())
            .to_request();
        let body = test::read_body(test::call_service(&app, req).await).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("between 0 and 10"));
        assert!(body.contains("Invalid rating!"));
        assert!(body.contains("Cats"));

        let req = test::TestRequest::get()
            .uri("/logout")
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/");

        // the server-side session is gone even if the client replays the cookie
        let req = test::TestRequest::get()
            .uri("/ratings")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/login");
    }

    #[actix_rt::test]
    async fn wrong_credentials_flash() {
        let state = state();
        state
            .auth
            .register(&mut SessionContext::anonymous(), "alice", "a@example.com", "secret")
            .unwrap();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/login")
            .set_form(&[("username", "alice"), ("password", "guess")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/login");
        let cookie = session_cookie(&resp).expect("no session cookie");

        let req = test::TestRequest::get()
            .uri("/login")
            .cookie(cookie.clone())
            .to_request();
        let body = test::read_body(test::call_service(&app, req).await).await;
        assert!(std::str::from_utf8(&body)
            .unwrap()
            .contains("Wrong credentials. Please try again!"));

        let req = test::TestRequest::post()
            .uri("/login")
            .cookie(cookie)
            .set_form(&[("username", "alice"), ("password", "secret")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/ratings");
        let cookie = session_cookie(&resp).expect("no session cookie");

        let req = test::TestRequest::get()
            .uri("/ratings")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_rt::test]
    async fn duplicate_registration_returns_to_form() {
        let state = state();
        state
            .auth
            .register(&mut SessionContext::anonymous(), "alice", "a@example.com", "secret")
            .unwrap();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/register")
            .set_form(&[
                ("username", "alice"),
                ("email", "b@example.com"),
                ("password", "other"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/register");
        let cookie = session_cookie(&resp).expect("no session cookie");

        let req = test::TestRequest::get()
            .uri("/ratings")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/login");
    }

    #[actix_rt::test]
    async fn search_and_overview() {
        let state = state();
        for owner in &["alice", "bob"] {
            state
                .auth
                .register(&mut SessionContext::anonymous(), owner, "x@example.com", "secret")
                .unwrap();
        }
        for (owner, name, rating) in &[("alice", "Inception", 9), ("bob", "inception", 4)] {
            state
                .ratings
                .add_rating(
                    owner,
                    RatingInput {
                        name: name.to_string(),
                        url: None,
                        rating: *rating,
                        comment: None,
                    },
                )
                .unwrap();
        }
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/")
            .set_form(&[("search", "Inception")])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("alice"));
        assert!(body.contains("bob"));

        let req = test::TestRequest::post()
            .uri("/")
            .set_form(&[("search", "Cats")])
            .to_request();
        let body = test::read_body(test::call_service(&app, req).await).await;
        assert!(std::str::from_utf8(&body)
            .unwrap()
            .contains("No one has rated"));

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("Inception"));
        assert!(body.contains("inception"));
    }

    #[actix_rt::test]
    async fn contact_form() {
        let app = app!(state());
        let req = test::TestRequest::post()
            .uri("/contact")
            .set_form(&[
                ("email", "visitor@example.com"),
                ("subject", "Hello"),
                ("message", "Nice site"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(location(&resp), "/success");

        let req = test::TestRequest::get().uri("/success").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
