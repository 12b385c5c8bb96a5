//! HTTP round trips through a real axum server and reqwest.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use library_api::BookRow;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use support::{capture_logs, spawn_server};

async fn send_json(
    client: &Client,
    method: reqwest::Method,
    url: String,
    body: Value,
) -> reqwest::Response {
    client.request(method, url).json(&body).send().await.unwrap()
}

#[tokio::test]
async fn create_book_then_link_author_from_the_author_side() {
    let (base, _) = spawn_server().await;
    let client = Client::new();

    let resp = send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/books"),
        json!({ "title": "b1", "pages": 100 }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["id"], 1);
    assert_eq!(created["title"], "b1");
    assert_eq!(created["pages"], 100);
    assert_eq!(created["authors"], json!([]));
    assert_eq!(created["deleted_at"], Value::Null);

    let resp = send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/authors"),
        json!({ "name": "a1", "books": [{ "id": 1 }] }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let author: Value = resp.json().await.unwrap();
    assert_eq!(author["books"][0]["id"], 1);

    let resp = client.get(format!("{base}/books/1")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let book: Value = resp.json().await.unwrap();
    let authors = book["authors"].as_array().unwrap();
    assert_eq!(authors.len(), 1);
    assert_eq!(authors[0]["id"], 1);
    assert_eq!(authors[0]["name"], "a1");
}

#[tokio::test]
async fn update_without_books_keeps_them() {
    let (base, _) = spawn_server().await;
    let client = Client::new();

    send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/books"),
        json!({ "title": "b1", "pages": 100 }),
    )
    .await;
    send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/authors"),
        json!({ "name": "a1", "books": [{ "id": 1 }] }),
    )
    .await;

    let resp = send_json(
        &client,
        reqwest::Method::PUT,
        format!("{base}/authors/1"),
        json!({ "name": "a2" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(resp.bytes().await.unwrap().is_empty());

    let author: Value = client
        .get(format!("{base}/authors/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(author["name"], "a2");
    assert_eq!(author["books"].as_array().unwrap().len(), 1);
    assert_eq!(author["books"][0]["title"], "b1");

    let resp = send_json(
        &client,
        reqwest::Method::PUT,
        format!("{base}/authors/1"),
        json!({ "books": [] }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let author: Value = client
        .get(format!("{base}/authors/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(author["name"], "a2");
    assert_eq!(author["books"], json!([]));
}

#[tokio::test]
async fn delete_book_detaches_all_authors() {
    let (base, store) = spawn_server().await;
    let client = Client::new();

    for name in ["a1", "a2"] {
        send_json(
            &client,
            reqwest::Method::POST,
            format!("{base}/authors"),
            json!({ "name": name }),
        )
        .await;
    }
    let resp = send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/books"),
        json!({ "title": "b1", "authors": [{ "id": 1 }, { "id": 2 }] }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(store.associations::<BookRow>(1).await.unwrap().len(), 2);

    let resp = client.delete(format!("{base}/books/1")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(store.associations::<BookRow>(1).await.unwrap().is_empty());

    let resp = client.get(format!("{base}/books/1")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "book 1 not found");

    let authors: Value = client
        .get(format!("{base}/authors"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(authors.as_array().unwrap().len(), 2);
    assert_eq!(authors[0]["books"], json!([]));

    let resp = client.delete(format!("{base}/books/1")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let (base, _) = spawn_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/books/abc")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].is_string());

    let resp = client.delete(format!("{base}/authors/x1")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{base}/books"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/books"),
        json!({ "pages": "many" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_codes_follow_the_failure_kind() {
    let (base, _) = spawn_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/books")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!([]));

    let resp = send_json(
        &client,
        reqwest::Method::PUT,
        format!("{base}/books/9"),
        json!({ "title": "x" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/books"),
        json!({ "id": 5, "title": "five" }),
    )
    .await;
    let resp = send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/books"),
        json!({ "id": 5, "title": "again" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "book 5 already exists");

    let resp = send_json(
        &client,
        reqwest::Method::POST,
        format!("{base}/authors"),
        json!({ "name": "a", "books": [{ "id": 77 }] }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let authors: Value = client
        .get(format!("{base}/authors"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(authors, json!([]));
}

#[tokio::test]
async fn health_reports_ok() {
    let (base, _) = spawn_server().await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "ok": true }));
}

#[tokio::test(flavor = "current_thread")]
async fn each_failed_request_logs_once() {
    let (logs, _guard) = capture_logs();
    let (base, _) = spawn_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/books/42")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let failures: Vec<_> = logs
        .lines()
        .into_iter()
        .filter(|line| line.contains(" WARN ") || line.contains(" ERROR "))
        .collect();
    assert_eq!(failures.len(), 1, "{failures:#?}");
    assert!(failures[0].contains("op=get"), "{}", failures[0]);
}
