use actix_files::NamedFile;
use actix_web::{
    get, middleware, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder, Result,
};
use tera::Tera;

use std::path::PathBuf;

mod message_store;
use message_store::{Message, MessageStore, StoreError};

use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct SendTdo {
    author: String,
    body: String,
}

#[derive(Serialize)]
struct SendResponseTdo {
    status: &'static str,
    message: Message,
}

#[derive(Deserialize)]
struct MessagesQueryTdo {
    since: Option<usize>,
}

#[derive(Serialize)]
struct MessagesTdo {
    messages: Vec<Message>,
}

#[get("/static/{filename:.*}")]
async fn get_static(req: HttpRequest) -> Result<NamedFile> {
    let path: PathBuf = req.match_info().query("filename").parse().unwrap();
    let mut whole_path = PathBuf::new();
    whole_path.push("static");
    whole_path.push(path);
    Ok(NamedFile::open(whole_path)?)
}

#[get("/")]
async fn get_index(data: web::Data<AppState>) -> impl Responder {
    let tera = &data.tera;
    let context = tera::Context::new();
    let output = tera.render("index.html", &context).unwrap();
    HttpResponse::Ok().body(output)
}

#[get("/messages")]
async fn get_messages(
    query: web::Query<MessagesQueryTdo>,
    data: web::Data<AppState>,
) -> impl Responder {
    let mut messages = data.store.list();
    // Incremental poll: only messages the client has not seen yet.
    if let Some(since) = query.since {
        messages.retain(|m| m.sequence > since);
    }
    HttpResponse::Ok().json(MessagesTdo { messages })
}

#[post("/send")]
async fn post_message(form: web::Json<SendTdo>, data: web::Data<AppState>) -> impl Responder {
    match data.store.append(&form.author, &form.body) {
        Ok(message) => {
            tracing::debug!(
                "accepted message #{} from {}",
                message.sequence,
                message.author
            );
            HttpResponse::Created().json(SendResponseTdo {
                status: "ok",
                message,
            })
        }
        Err(e @ StoreError::Validation(_)) => HttpResponse::BadRequest().body(format!("{}", e)),
        Err(e) => {
            tracing::error!("could not store message: {}", e);
            HttpResponse::InternalServerError().body(format!("{}", e))
        }
    }
}

struct AppState {
    tera: Tera,
    store: MessageStore,
}

const STORE_FILE: &str = "messages.json";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    // The storage path is owned here and injected into the store; nothing
    // else knows where the log lives.
    let store = match MessageStore::open(STORE_FILE) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("could not open message store: {}", e);
            ::std::process::exit(1);
        }
    };
    tracing::info!("loaded {} messages from {}", store.list().len(), STORE_FILE);

    let tera = match Tera::new("templates/*.html") {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("template parsing error: {}", e);
            ::std::process::exit(1);
        }
    };

    let app_data = web::Data::new(AppState { tera, store });

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(app_data.clone())
            .service(get_static)
            .service(get_index)
            .service(get_messages)
            .service(post_message)
    })
    .bind("127.0.0.1:8000")?
    .run()
    .await
}
