//! 变量仓库并发测试

use std::sync::Arc;

use mtd_executor::{Variable, VariableRepository};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let repo = Arc::new(VariableRepository::new());
    repo.store("hits", Variable::Counter(0)).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            for _ in 0..100 {
                repo.increment("hits", 1).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(repo.get("hits").await.unwrap().as_counter(), Some(1_600));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stores_to_distinct_keys() {
    let repo = Arc::new(VariableRepository::new());

    let mut handles = Vec::new();
    for i in 0..32 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            repo.store(format!("k{:02}", i), Variable::Text(i.to_string()))
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let keys = repo.keys().await;
    assert_eq!(keys.len(), 32);
    assert_eq!(keys[0], "k00");
    assert_eq!(repo.get("k31").await.unwrap().as_text(), Some("31"));
}
