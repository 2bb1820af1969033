#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use axum::middleware::from_fn_with_state;
    use tower::ServiceExt;
    use serde_json::Value;
    use http_body_util::BodyExt; // for .collect()
    use crate::config::AppConfig;
    use crate::state::AppState;
    use crate::routes;
    use crate::tests::support::{wait_for_job, Script, ScriptedBackend};

    async fn setup_test_app(backend: Arc<ScriptedBackend>) -> (axum::Router, AppState) {
        let state = AppState::new(backend, AppConfig::default());
        state.registry.initialize().await.unwrap();
        state.registry.refresh_devices().await.unwrap();

        let app = routes::router(state.clone()).layer(from_fn_with_state(
            state.config.clone(),
            crate::middleware::security_headers::security_headers_middleware,
        ));

        (app, state)
    }

    async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_list_devices() {
        let (app, _) = setup_test_app(ScriptedBackend::new(&["scanner1", "scanner2"])).await;

        let (status, body) = send(&app, "GET", "/devices").await;
        assert_eq!(status, StatusCode::OK);
        let devices = body.as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["name"], "scanner1");
        assert_eq!(devices[0]["status"], "disabled");
        assert_eq!(devices[0]["job_count"], 0);
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let (app, _) = setup_test_app(ScriptedBackend::new(&["scanner1"])).await;

        let response = app
            .oneshot(Request::builder().uri("/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers.contains_key("x-content-type-options"));
        assert!(headers.contains_key("x-frame-options"));
        assert!(headers.contains_key("referrer-policy"));
        assert_eq!(headers.get("cache-control").unwrap(), "no-store");
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let (app, _) = setup_test_app(ScriptedBackend::new(&["scanner1"])).await;

        for (method, uri) in [
            ("GET", "/devices/scanner9/parameters"),
            ("GET", "/devices/scanner9/options"),
            ("PUT", "/devices/scanner9/scan"),
            ("GET", "/devices/scanner9/jobs"),
            ("GET", "/service/devices/scanner9"),
            ("PUT", "/service/devices/scanner9/enable"),
        ] {
            let (status, body) = send(&app, method, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
            assert_eq!(body["error"]["code"], "NOT_FOUND");
        }
    }

    #[tokio::test]
    async fn test_disabled_device_is_not_found() {
        let (app, _) = setup_test_app(ScriptedBackend::new(&["scanner1"])).await;

        let (status, body) = send(&app, "GET", "/devices/scanner1/parameters").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"]["message"].as_str().unwrap().contains("not enabled"));

        let (status, _) = send(&app, "PUT", "/devices/scanner1/scan").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_enable_and_disable() {
        let (app, _) = setup_test_app(ScriptedBackend::new(&["scanner1"])).await;

        let (status, body) = send(&app, "PUT", "/service/devices/scanner1/enable").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "idle");

        let (status, body) = send(&app, "GET", "/devices/scanner1/parameters").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["format"], "color");
        assert_eq!(body["pixels_per_line"], 1275);

        let (status, body) = send(&app, "PUT", "/service/devices/scanner1/disable").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "disabled");

        // Disabling twice is refused
        let (status, body) = send(&app, "PUT", "/service/devices/scanner1/disable").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_options_roundtrip() {
        let (app, _) = setup_test_app(ScriptedBackend::new(&["scanner1"])).await;
        send(&app, "PUT", "/service/devices/scanner1/enable").await;

        let (status, body) = send(&app, "GET", "/devices/scanner1/options").await;
        assert_eq!(status, StatusCode::OK);
        let tl_x = body.as_array().unwrap().iter().find(|o| o["name"] == "tl-x").unwrap();
        assert_eq!(tl_x["identifier"], "tl_x");

        let (status, body) =
            send(&app, "PUT", "/devices/scanner1/options?option_name=resolution&option_value=300").await;
        assert_eq!(status, StatusCode::OK);
        let resolution = body.as_array().unwrap().iter().find(|o| o["identifier"] == "resolution").unwrap();
        assert_eq!(resolution["value"], 300);
    }

    #[tokio::test]
    async fn test_option_errors() {
        let (app, _) = setup_test_app(ScriptedBackend::new(&["scanner1"])).await;
        send(&app, "PUT", "/service/devices/scanner1/enable").await;

        let (status, _) = send(&app, "PUT", "/devices/scanner1/options?option_name=gamma&option_value=1").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            send(&app, "PUT", "/devices/scanner1/options?option_name=resolution&option_value=high").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(&app, "PUT", "/devices/scanner1/options?option_name=resolution&option_value=9000").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "BACKEND_ERROR");

        let (status, body) = send(&app, "PUT", "/devices/scanner1/options?option_name=&option_value=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_scan_and_fetch_job() {
        let backend = ScriptedBackend::new(&["scanner1"]);
        backend.set_script(Script { source: Some("ADF".into()), feeder_pages: 2, ..Script::default() });
        let gate = backend.hold_captures();
        let (app, state) = setup_test_app(backend).await;
        send(&app, "PUT", "/service/devices/scanner1/enable").await;

        let (status, body) = send(&app, "PUT", "/devices/scanner1/scan").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job_number"], 0);
        assert_eq!(body["status"], "started");
        assert_eq!(body["pages"].as_array().unwrap().len(), 0);

        // Busy while the capture is held
        let (scan_again, _) = send(&app, "PUT", "/devices/scanner1/scan").await;
        let (read_options, _) = send(&app, "GET", "/devices/scanner1/options").await;
        let (reinitialize, _) = send(&app, "PUT", "/service/reinitialize").await;
        gate.open();
        assert_eq!(scan_again, StatusCode::BAD_REQUEST);
        assert_eq!(read_options, StatusCode::BAD_REQUEST);
        assert_eq!(reinitialize, StatusCode::BAD_REQUEST);

        let device = state.registry.get_device("scanner1").await.unwrap();
        wait_for_job(&device.get_job(0).await.unwrap()).await;

        let (status, body) = send(&app, "GET", "/devices/scanner1/jobs/0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["pages"].as_array().unwrap().len(), 2);
        assert!(body["pages"][0].as_str().unwrap().starts_with("/9j/"));

        let (status, body) = send(&app, "GET", "/devices/scanner1/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "GET", "/devices/scanner1/jobs/1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_service_version_and_refresh() {
        let backend = ScriptedBackend::new(&["scanner1"]);
        let (app, _) = setup_test_app(backend.clone()).await;

        let (status, body) = send(&app, "GET", "/service").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "scripted 1.0");

        backend.set_devices(&["scanner2"]);
        let (status, body) = send(&app, "GET", "/service/refresh_devices").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "scanner2");

        let (status, _) = send(&app, "GET", "/service/devices/scanner1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "PUT", "/service/reinitialize").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "scripted 1.0");
    }
}
