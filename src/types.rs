/// A sighting as submitted by a camera, before it has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub plate: String,
    pub timestamp: String,
    pub source: String,
}

/// A stored sighting. Never updated in place; deleted and recreated instead.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub id: String,
    pub plate: String,
    pub timestamp: String,
    pub source: String,
    pub created_at: f64,
}
