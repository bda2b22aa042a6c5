use super::bearer_token;
use axum::http::Request;

fn parts_with(header: Option<&str>) -> axum::http::request::Parts {
    let mut builder = Request::get("/");
    if let Some(value) = header {
        builder = builder.header("authorization", value);
    }
    builder.body(()).expect("request").into_parts().0
}

#[test]
fn extracts_bearer_token_case_insensitively() {
    assert_eq!(bearer_token(&parts_with(Some("Bearer abc.def"))), Some("abc.def"));
    assert_eq!(bearer_token(&parts_with(Some("bearer  abc.def "))), Some("abc.def"));
}

#[test]
fn rejects_missing_or_other_schemes() {
    assert_eq!(bearer_token(&parts_with(None)), None);
    assert_eq!(bearer_token(&parts_with(Some("Basic dXNlcjpwdw=="))), None);
    assert_eq!(bearer_token(&parts_with(Some("Bearer"))), None);
    assert_eq!(bearer_token(&parts_with(Some("Bearer   "))), None);
}
