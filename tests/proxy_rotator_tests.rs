use pricetrawl::proxy::harvest;
use pricetrawl::{ProxyCandidate, ProxyRotator, ProxySettings};

fn candidate(host: &str, port: u16) -> ProxyCandidate {
    ProxyCandidate::new(host, port)
}

#[tokio::test]
async fn rotates_round_robin_over_candidates() {
    let rotator = ProxyRotator::new();
    rotator
        .add_candidates(vec![candidate("10.0.0.1", 8080), candidate("10.0.0.2", 8080)])
        .await;

    let first = rotator.get_next().await.expect("candidate").address();
    let second = rotator.get_next().await.expect("candidate").address();
    let third = rotator.get_next().await.expect("candidate").address();
    assert_ne!(first, second);
    assert_eq!(first, third);
}

#[tokio::test]
async fn empty_pool_yields_none_until_loaded() {
    let rotator = ProxyRotator::new();
    assert!(rotator.get_next().await.is_none());
    rotator.add_candidates(vec![candidate("10.0.0.1", 8080)]).await;
    assert!(rotator.get_next().await.is_some());
}

// A pool where everything has failed must keep rotating rather than
// starving the engine of proxies.
#[tokio::test]
async fn fully_unhealthy_pool_resets_instead_of_starving() {
    let rotator = ProxyRotator::new();
    rotator
        .add_candidates(vec![candidate("10.0.0.1", 8080), candidate("10.0.0.2", 8080)])
        .await;

    for address in ["10.0.0.1:8080", "10.0.0.2:8080"] {
        for _ in 0..3 {
            rotator.mark_failed(address).await;
        }
    }

    let next = rotator.get_next().await.expect("reset pool still serves");
    assert!(next.is_healthy());
}

#[tokio::test]
async fn success_heals_a_failing_candidate() {
    let rotator = ProxyRotator::new();
    rotator.add_candidates(vec![candidate("10.0.0.1", 8080)]).await;

    rotator.mark_failed("10.0.0.1:8080").await;
    rotator.mark_failed("10.0.0.1:8080").await;
    rotator.mark_success("10.0.0.1:8080").await;
    rotator.mark_success("10.0.0.1:8080").await;
    // Extra successes must not underflow the failure count.
    rotator.mark_success("10.0.0.1:8080").await;

    let next = rotator.get_next().await.expect("candidate");
    assert!(next.is_healthy());
    assert_eq!(next.fail_count, 0);
}

#[tokio::test]
async fn duplicate_addresses_are_not_added_twice() {
    let rotator = ProxyRotator::new();
    rotator
        .add_candidates(vec![candidate("10.0.0.1", 8080), candidate("10.0.0.1", 8080)])
        .await;
    assert_eq!(rotator.len().await, 1);
}

#[tokio::test]
async fn explicit_proxy_pins_the_pool() {
    let rotator = ProxyRotator::new();
    rotator
        .load_explicit(&ProxySettings {
            host: "proxy.internal".to_string(),
            port: 3128,
            protocol: "http".to_string(),
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
        })
        .await;

    // Harvest results must never displace an explicitly configured proxy.
    rotator.add_candidates(vec![candidate("10.0.0.1", 8080)]).await;
    rotator.replace_harvested(vec![candidate("10.0.0.2", 8080)]).await;

    assert_eq!(rotator.len().await, 1);
    let next = rotator.get_next().await.expect("pinned proxy");
    assert_eq!(next.address(), "proxy.internal:3128");
    assert!(next.has_credentials());
}

#[tokio::test]
async fn harvest_tolerates_a_dead_source() {
    let mut good = mockito::Server::new_async().await;
    let mut dead = mockito::Server::new_async().await;

    let good_mock = good
        .mock("GET", "/list.txt")
        .with_status(200)
        .with_body("1.2.3.4:8080\nnot a proxy line\n5.6.7.8:3128\n1.2.3.4:8080\n")
        .create_async()
        .await;
    let dead_mock = dead
        .mock("GET", "/list.txt")
        .with_status(503)
        .create_async()
        .await;

    let sources = vec![
        format!("{}/list.txt", good.url()),
        format!("{}/list.txt", dead.url()),
    ];
    let harvested = harvest::harvest(&harvest::client(), &sources).await;

    good_mock.assert_async().await;
    dead_mock.assert_async().await;

    let addresses: Vec<String> = harvested.iter().map(|c| c.address()).collect();
    assert_eq!(addresses, vec!["1.2.3.4:8080", "5.6.7.8:3128"]);
}
