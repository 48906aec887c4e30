//! Candidate processing unit tests

use discovery_engine::discovery::processor::CandidateDevicesProcessor;
use discovery_engine::models::candidates::{
    CandidateDevicesCollection, CandidateDevicesResultContainer,
};
use discovery_engine::models::description::{CapabilityValue, DeviceCapability, DeviceDescription};
use discovery_engine::models::template::{
    DeviceRequirement, DeviceTemplate, NumberOperator, ScoringCriterion, StringOperator,
};

fn device(mac: &str, name: &str, description: &str, ram: f64) -> DeviceDescription {
    let mut d = DeviceDescription {
        name: Some(name.to_string()),
        description: Some(description.to_string()),
        ..Default::default()
    };
    d.identifiers.mac_address = Some(mac.to_string());
    d.capabilities.push(DeviceCapability {
        name: "ram".to_string(),
        value: CapabilityValue::Number(ram),
    });
    d
}

fn camera_template() -> DeviceTemplate {
    DeviceTemplate {
        id: "T1".to_string(),
        name: "Cameras".to_string(),
        owner: "alice".to_string(),
        requirements: vec![
            DeviceRequirement::Name {
                operator: StringOperator::BeginsWith,
                pattern: "dev".to_string(),
            },
            DeviceRequirement::NumberCapability {
                capability_name: "ram".to_string(),
                operator: NumberOperator::GreaterEquals,
                threshold: 512.0,
            },
        ],
        scoring_criteria: vec![ScoringCriterion::Description {
            query: "camera".to_string(),
            exact_match_score: 10.0,
        }],
    }
}

fn camera_container() -> CandidateDevicesResultContainer {
    let mut container = CandidateDevicesResultContainer::new("T1");
    container.replace_collection(CandidateDevicesCollection::with_devices(
        "repo-a",
        vec![
            device("aa:00", "dev-cam", "Outdoor camera", 1024.0),
            device("aa:02", "dev-tiny", "Indoor camera", 128.0),
        ],
    ));
    container.replace_collection(CandidateDevicesCollection::with_devices(
        "repo-b",
        vec![
            device("aa:01", "dev-sensor", "Humidity sensor", 2048.0),
            device("aa:03", "gateway", "Outdoor camera", 4096.0),
        ],
    ));
    container
}

#[test]
fn test_camera_ranks_above_unrelated_device() {
    let ranking = CandidateDevicesProcessor::new().process(&camera_container(), &camera_template());

    assert_eq!(ranking.len(), 2);
    assert_eq!(ranking.mac_addresses(), vec!["aa:00", "aa:01"]);

    let camera = &ranking.entries()[0];
    assert_eq!(camera.repository_name, "repo-a");
    assert!((camera.score - 10.0).abs() < 1e-6, "score was {}", camera.score);
    assert_eq!(ranking.entries()[1].score, 0.0);
    assert_eq!(ranking.top_score(), Some(camera.score));
}

#[test]
fn test_more_requirements_never_add_candidates() {
    let processor = CandidateDevicesProcessor::new();
    let container = camera_container();

    let mut template = camera_template();
    let loose = processor.process(&container, &template).mac_addresses();

    template.requirements.push(DeviceRequirement::Keyword {
        operator: StringOperator::Equals,
        pattern: "outdoor".to_string(),
    });
    let strict = processor.process(&container, &template).mac_addresses();

    assert!(strict.len() <= loose.len());
    assert!(strict.iter().all(|mac| loose.contains(mac)));
    // no candidate carries keywords
    assert!(strict.is_empty());
}

#[test]
fn test_ranking_is_deterministic() {
    let processor = CandidateDevicesProcessor::new();
    let template = DeviceTemplate {
        requirements: vec![],
        ..camera_template()
    };
    let container = camera_container();

    let first = processor.process(&container, &template);
    let second = processor.process(&container, &template);

    assert_eq!(first.mac_addresses(), second.mac_addresses());
    let first_scores: Vec<f64> = first.iter().map(|e| e.score).collect();
    let second_scores: Vec<f64> = second.iter().map(|e| e.score).collect();
    assert_eq!(first_scores, second_scores);
}

#[test]
fn test_equal_scores_keep_first_seen_order() {
    let template = DeviceTemplate {
        id: "T2".to_string(),
        name: String::new(),
        owner: "alice".to_string(),
        requirements: vec![],
        scoring_criteria: vec![],
    };
    let mut container = CandidateDevicesResultContainer::new("T2");
    container.replace_collection(CandidateDevicesCollection::with_devices(
        "repo-a",
        vec![device("bb:02", "x", "", 1.0), device("bb:01", "y", "", 1.0)],
    ));
    container.replace_collection(CandidateDevicesCollection::with_devices(
        "repo-b",
        vec![device("bb:00", "z", "", 1.0)],
    ));

    let ranking = CandidateDevicesProcessor::new().process(&container, &template);
    assert_eq!(ranking.mac_addresses(), vec!["bb:02", "bb:01", "bb:00"]);
    assert!(ranking.iter().all(|e| e.score == 0.0));
}
