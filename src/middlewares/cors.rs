use actix_cors::Cors;

/// `allowed_origins` 为空时放行任意来源（本地开发用）
pub fn create_cors(allowed_origins: &[String]) -> Cors {
    let origins = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            if origins.is_empty() {
                return true;
            }
            origin
                .to_str()
                .map(|o| origins.iter().any(|allowed| allowed == o))
                .unwrap_or(false)
        })
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, http::header, test as actix_test, web};

    #[actix_web::test]
    async fn rejects_unknown_origin_when_list_is_set() {
        let app = actix_test::init_service(
            App::new()
                .wrap(create_cors(&["https://app.example.com".to_string()]))
                .route("/ping", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let allowed = actix_test::TestRequest::get()
            .uri("/ping")
            .insert_header((header::ORIGIN, "https://app.example.com"))
            .to_request();
        let resp = actix_test::call_service(&app, allowed).await;
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("https://app.example.com")
        );

        let denied = actix_test::TestRequest::get()
            .uri("/ping")
            .insert_header((header::ORIGIN, "https://evil.example.com"))
            .to_request();
        let result = actix_test::try_call_service(&app, denied).await;
        assert!(
            result.is_err()
                || result
                    .map(|r| r.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none())
                    .unwrap_or(true)
        );
    }
}
