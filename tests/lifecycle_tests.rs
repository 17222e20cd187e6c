mod common;

use chrono::Duration;
use common::*;
use fleet_controller::controller::{ApplicationController, ControllerParts};
use fleet_controller::core::{
    ApplicationId, ApplicationName, ApplicationVersion, Clock, ControllerError, DeploymentId, Hostname,
    SourceRevision, Version,
};
use fleet_controller::integration::{
    AccessToken, ArtifactStore, DeployOptions, EndpointStatus, Node, NodeState, RotationStatus,
    RoutingEndpoint,
};
use fleet_controller::model::{Change, JobError, JobRun, JobType, Tenant};
use fleet_controller::store::FileEntityStore;
use std::sync::Arc;

#[tokio::test]
async fn test_create_and_list_applications() {
    let fixture = Fixture::new().await;
    fixture.create("b-app").await;
    fixture.create("a-app").await;

    let names: Vec<String> = fixture
        .controller
        .as_list_for_tenant(&USER_TENANT.into())
        .await
        .unwrap()
        .iter()
        .map(|application| application.id.application.to_string())
        .collect();
    assert_eq!(names, ["a-app", "b-app"]);
    assert!(fixture
        .controller
        .as_list_for_tenant(&IDENTITY_TENANT.into())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_dash_and_underscore_twins_conflict() {
    let fixture = Fixture::new().await;
    fixture.create("my-app").await;

    let twin = ApplicationId::default_instance(USER_TENANT, "my_app");
    let err = fixture.controller.create_application(&twin, None).await.unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(err.to_string().contains("already exists"));

    fixture.create("other_app").await;
    let twin = ApplicationId::default_instance(USER_TENANT, "other-app");
    assert!(fixture
        .controller
        .create_application(&twin, None)
        .await
        .unwrap_err()
        .is_invalid_argument());
}

#[tokio::test]
async fn test_create_rejects_bad_requests() {
    let fixture = Fixture::new().await;
    let controller = &fixture.controller;

    let non_default = ApplicationId::new(USER_TENANT, "app1", "canary");
    assert!(controller.create_application(&non_default, None).await.unwrap_err().is_invalid_argument());

    let bad_name = ApplicationId::default_instance(USER_TENANT, "Not-Valid!");
    let err = controller.create_application(&bad_name, None).await.unwrap_err();
    assert!(err.to_string().contains("must match"));

    let no_tenant = ApplicationId::default_instance("nobody", "app1");
    assert!(controller.create_application(&no_tenant, None).await.unwrap_err().is_not_found());

    let id = fixture.create("app1").await;
    let err = controller.create_application(&id, None).await.unwrap_err();
    assert!(err.to_string().contains("Application already exists"));
}

#[tokio::test]
async fn test_identity_tenant_registers_applications() {
    let fixture = Fixture::new().await;
    let id = ApplicationId::default_instance(IDENTITY_TENANT, "app1");
    let token = AccessToken::new("secret");
    let name = ApplicationName::new("app1");

    let err = fixture.controller.create_application(&id, None).await.unwrap_err();
    assert!(err.to_string().contains("No access token provided"));

    fixture.controller.create_application(&id, Some(&token)).await.unwrap();
    assert!(fixture.identity.is_registered(IDENTITY_DOMAIN, &name).await);

    let err = fixture.controller.delete_application(&id, None).await.unwrap_err();
    assert!(err.is_invalid_argument());
    fixture.controller.delete_application(&id, Some(&token)).await.unwrap();
    assert!(!fixture.identity.is_registered(IDENTITY_DOMAIN, &name).await);
    assert!(fixture.controller.get(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_requires_no_deployments() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    let zone = dev("us-east-1");
    fixture.deploy_directly(&id, &zone, bare_package()).await.unwrap();

    let err = fixture.controller.delete_application(&id, None).await.unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(err.to_string().contains("active deployments"));

    fixture.controller.deactivate(&id, &zone).await.unwrap();
    fixture
        .application_store
        .put(&id, &ApplicationVersion::unknown(), b"{}".to_vec())
        .await
        .unwrap();
    fixture.controller.delete_application(&id, None).await.unwrap();
    assert!(fixture.controller.get(&id).await.unwrap().is_none());
    assert_eq!(fixture.application_store.len().await, 0);

    assert!(fixture
        .controller
        .delete_application(&id, None)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_deactivate_forgets_deployment() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    let zone = dev("us-east-1");
    fixture.deploy_directly(&id, &zone, bare_package()).await.unwrap();
    let deployment = DeploymentId::new(id.clone(), zone.clone());
    assert!(fixture.zone_runtime.active(&deployment).await.is_some());

    fixture.controller.deactivate(&id, &zone).await.unwrap();
    assert!(fixture.zone_runtime.active(&deployment).await.is_none());
    assert!(fixture.controller.require(&id).await.unwrap().deployments.is_empty());

    // Already gone from the zone.
    fixture.controller.deactivate(&id, &zone).await.unwrap();

    let missing = ApplicationId::default_instance(USER_TENANT, "missing");
    assert!(fixture.controller.deactivate(&missing, &zone).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_suspension_and_restart_pass_through() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    let zone = dev("us-east-1");
    let deployment = DeploymentId::new(id.clone(), zone.clone());
    assert!(!fixture.controller.is_suspended(&deployment).await.unwrap());

    fixture.deploy_directly(&id, &zone, bare_package()).await.unwrap();
    fixture.zone_runtime.suspend(&deployment).await;
    assert!(fixture.controller.is_suspended(&deployment).await.unwrap());

    let host = Hostname::new("host1.example.com");
    fixture.controller.restart(&deployment, Some(&host)).await.unwrap();
    fixture.controller.restart(&deployment, None).await.unwrap();
    assert_eq!(
        fixture.zone_runtime.restarts().await,
        vec![(deployment.clone(), Some(host)), (deployment, None)]
    );
}

#[tokio::test]
async fn test_force_and_cancel_change() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    let version = ApplicationVersion::from(
        SourceRevision::new("repo", "master", "abcdef0123"),
        7,
    );

    let err = fixture.controller.force_change(&id, Change::empty()).await.unwrap_err();
    assert!(err.is_invalid_argument());

    let change = Change {
        platform: Some(Version::new(7, 2, 0)),
        application: Some(version.clone()),
    };
    fixture.controller.force_change(&id, change.clone()).await.unwrap();
    assert_eq!(fixture.controller.require(&id).await.unwrap().change, change);

    fixture.controller.cancel_change(&id, true).await.unwrap();
    assert_eq!(
        fixture.controller.require(&id).await.unwrap().change,
        Change::of_application(version)
    );

    fixture.controller.cancel_change(&id, false).await.unwrap();
    assert!(!fixture.controller.require(&id).await.unwrap().change.is_present());
}

#[tokio::test]
async fn test_component_completion_starts_or_queues_change() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    let first = ApplicationVersion::from(
        SourceRevision::new("repo", "master", "commit1"),
        1,
    );
    let second = ApplicationVersion::from(
        SourceRevision::new("repo", "master", "commit2"),
        2,
    );

    for (number, built) in [(1, &first), (2, &second)] {
        let run = JobRun::triggering(
            number,
            Version::new(7, 0, 0),
            ApplicationVersion::unknown(),
            "commit",
            fixture.clock.now(),
        );
        fixture
            .controller
            .notify_job_triggered(&id, JobType::Component, run)
            .await
            .unwrap();
        fixture.clock.advance(Duration::minutes(1));
        fixture
            .controller
            .notify_job_completion(&id, &JobType::Component, None, Some(built.clone()))
            .await
            .unwrap();
    }

    let application = fixture.controller.require(&id).await.unwrap();
    assert_eq!(application.change, Change::of_application(first));
    assert_eq!(application.outstanding_change, Change::of_application(second));
    let status = application.deployment_jobs.status_of(&JobType::Component).unwrap();
    assert!(status.last_success.is_some());
    assert!(!status.expects_deployment());
}

#[tokio::test]
async fn test_failed_job_records_error_without_change() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    let run = JobRun::triggering(
        1,
        Version::new(7, 0, 0),
        ApplicationVersion::unknown(),
        "commit",
        fixture.clock.now(),
    );
    fixture
        .controller
        .notify_job_triggered(&id, JobType::SystemTest, run)
        .await
        .unwrap();
    fixture.clock.advance(Duration::minutes(1));
    fixture
        .controller
        .notify_job_completion(&id, &JobType::SystemTest, Some(JobError::OutOfCapacity), None)
        .await
        .unwrap();

    let application = fixture.controller.require(&id).await.unwrap();
    let status = application.deployment_jobs.status_of(&JobType::SystemTest).unwrap();
    assert_eq!(status.error, Some(JobError::OutOfCapacity));
    assert!(status.first_failing.is_some());
    assert!(!application.change.is_present());

    let err = fixture
        .controller
        .notify_job_completion(&id, &JobType::StagingTest, None, None)
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_oldest_installed_platform_of_production_nodes() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    assert_eq!(
        fixture.controller.oldest_installed_platform(&id).await.unwrap(),
        Version::new(7, 0, 0)
    );

    let zone = prod("us-east-3");
    fixture
        .deploy_directly(&id, &zone, package(spec(&["us-east-3"])))
        .await
        .unwrap();
    let node = |name: &str, state: NodeState, version: Option<Version>| Node {
        hostname: Hostname::new(name),
        state,
        current_version: version,
        wanted_version: Some(Version::new(7, 0, 0)),
    };
    fixture
        .zone_runtime
        .set_nodes(
            &zone,
            &id,
            vec![
                node("host1", NodeState::Active, Some(Version::new(6, 9, 0))),
                node("host2", NodeState::Reserved, Some(Version::new(6, 8, 1))),
                node("host3", NodeState::Failed, Some(Version::new(5, 0, 0))),
                node("host4", NodeState::Active, None),
            ],
        )
        .await;

    assert_eq!(
        fixture.controller.oldest_installed_platform(&id).await.unwrap(),
        Version::new(6, 8, 1)
    );
}

#[tokio::test]
async fn test_global_rotation_status_uses_canonical_endpoint() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    let deployment = DeploymentId::new(id.clone(), prod("us-east-3"));
    assert!(fixture
        .controller
        .set_global_rotation_status(
            &deployment,
            EndpointStatus::new(RotationStatus::Out, "", "operator", fixture.clock.now())
        )
        .await
        .unwrap()
        .is_empty());

    fixture
        .routing
        .put_endpoints(
            deployment.clone(),
            vec![
                RoutingEndpoint::new(
                    "https://app1--tenant1.global.apps.internal:4443/",
                    "lb1.us-east-3",
                    true,
                ),
                RoutingEndpoint::new(
                    "https://app1.tenant1.us-east-3.apps.internal:4443/",
                    "lb1.us-east-3",
                    false,
                ),
                RoutingEndpoint::new(
                    "https://app1.tenant1.us-east-3.apps.cloud:443/",
                    "lb2.us-east-3",
                    false,
                ),
            ],
        )
        .await;

    let status = EndpointStatus::new(
        RotationStatus::Out,
        "maintenance",
        "operator",
        fixture.clock.now(),
    );
    let changed = fixture
        .controller
        .set_global_rotation_status(&deployment, status.clone())
        .await
        .unwrap();
    assert_eq!(changed, vec!["app1.tenant1.us-east-3".to_string()]);

    let statuses = fixture.controller.global_rotation_status(&deployment).await.unwrap();
    assert_eq!(statuses.get("app1.tenant1.us-east-3"), Some(&status));

    fixture.routing.set_unavailable(true);
    let err = fixture
        .controller
        .global_rotation_status(&deployment)
        .await
        .unwrap_err();
    assert!(err.is_remote_execution());
}

#[tokio::test]
async fn test_deployment_endpoints() {
    let fixture = Fixture::new().await;
    let id = fixture.create("app1").await;
    let zone = dev("us-east-1");
    let deployment = DeploymentId::new(id.clone(), zone.clone());
    assert!(fixture
        .controller
        .deployment_endpoints(&deployment)
        .await
        .unwrap_err()
        .is_not_found());

    fixture.deploy_directly(&id, &zone, bare_package()).await.unwrap();
    fixture
        .routing
        .put_endpoints(
            deployment.clone(),
            vec![RoutingEndpoint::new(
                "https://app1.tenant1.us-east-1.dev.apps.internal/",
                "lb1",
                false,
            )],
        )
        .await;
    let endpoints = fixture
        .controller
        .deployment_endpoints(&deployment)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].host_str(), Some("app1.tenant1.us-east-1.dev.apps.internal"));

    fixture.routing.set_unavailable(true);
    assert!(fixture
        .controller
        .deployment_endpoints(&deployment)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_lock_timeout_is_reported() {
    let fixture =
        Fixture::with_config(config().with_lock_timeout(std::time::Duration::from_millis(50)))
            .await;
    let id = fixture.create("app1").await;

    let held = fixture.controller.lock(&id).await.unwrap();
    let err = fixture
        .controller
        .force_change(&id, Change::of_platform(Version::new(7, 1, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::LockTimeout(_)));

    drop(held);
    fixture
        .controller
        .force_change(&id, Change::of_platform(Version::new(7, 1, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_applications_survive_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let id = ApplicationId::default_instance(USER_TENANT, "app1");

    let controller_on = |store: FileEntityStore| async move {
        let mut parts = ControllerParts::in_memory();
        parts.store = Arc::new(store);
        parts.tenants.create(Tenant::user(USER_TENANT)).await.unwrap();
        ApplicationController::new(&config(), parts)
    };

    let first = controller_on(FileEntityStore::open(dir.path()).await.unwrap()).await;
    first.create_application(&id, None).await.unwrap();
    first
        .deploy(
            &id,
            &dev("us-east-1"),
            Some(bare_package()),
            None,
            DeployOptions::directly(),
        )
        .await
        .unwrap();

    let second = controller_on(FileEntityStore::open(dir.path()).await.unwrap()).await;
    let application = second.require(&id).await.unwrap();
    assert_eq!(application.deployments.len(), 1);
    assert_eq!(second.rewrite_all().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unreadable_application_keeps_its_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileEntityStore::open(dir.path()).await.unwrap();
    let mut parts = ControllerParts::in_memory();
    parts.store = Arc::new(store.clone());
    parts.tenants.create(Tenant::user(USER_TENANT)).await.unwrap();
    let controller = ApplicationController::new(&config(), parts);

    let app1 = ApplicationId::default_instance(USER_TENANT, "app1");
    let app2 = ApplicationId::default_instance(USER_TENANT, "app2");
    controller.create_application(&app1, None).await.unwrap();
    controller.create_application(&app2, None).await.unwrap();
    let deploy = |id: ApplicationId| {
        let controller = &controller;
        async move {
            controller
                .deploy(
                    &id,
                    &prod("us-east-3"),
                    Some(package(global_spec(&["us-east-3"]))),
                    None,
                    DeployOptions::directly(),
                )
                .await
        }
    };
    deploy(app1.clone()).await.unwrap();

    let path = dir.path().join(format!("{}.json", app1.serialized_form()));
    std::fs::write(&path, b"{\"id\":").unwrap();

    let err = deploy(app2.clone()).await.unwrap_err();
    assert!(matches!(err, ControllerError::Serialization(_)));
    assert_eq!(controller.require(&app2).await.unwrap().rotation, None);
    assert!(matches!(
        controller.as_list().await.unwrap_err(),
        ControllerError::Serialization(_)
    ));
}

