//! PUG-View compound record client

use harvest_core::{Fetch, FetchError, Fetched, HttpClient, HttpSettings};

use crate::source::Cid;

/// Fetches one compound record per CID.
pub struct PubChemClient {
    http: HttpClient,
    base_url: String,
}

impl PubChemClient {
    pub fn new(base_url: &str, settings: &HttpSettings) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::new(settings)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn record_url(&self, cid: Cid) -> String {
        format!("{}/data/compound/{}/JSON/", self.base_url, cid.0)
    }
}

/// A usable record has a `Record` object; anything else is specific to this CID.
pub fn check_record(payload: &serde_json::Value) -> Result<(), FetchError> {
    if payload.get("Record").is_some_and(serde_json::Value::is_object) {
        Ok(())
    } else {
        Err(FetchError::Permanent("response has no Record object".into()))
    }
}

impl Fetch for PubChemClient {
    type Item = Cid;

    fn fetch(&mut self, cid: &Cid) -> Result<Fetched, FetchError> {
        let (payload, bytes) = self.http.get_json(&self.record_url(*cid), &[])?;
        check_record(&payload)?;
        Ok(Fetched::new(payload).with_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_url_format() {
        let client =
            PubChemClient::new("https://pubchem.ncbi.nlm.nih.gov/rest/pug_view/", &HttpSettings::default())
                .unwrap();
        assert_eq!(
            client.record_url(Cid(2244)),
            "https://pubchem.ncbi.nlm.nih.gov/rest/pug_view/data/compound/2244/JSON/"
        );
    }

    #[test]
    fn fault_payload_is_permanent() {
        let fault = json!({"Fault": {"Code": "PUGVIEW.NotFound"}});
        assert!(matches!(check_record(&fault), Err(FetchError::Permanent(_))));
        assert!(check_record(&json!({"Record": {"RecordNumber": 1}})).is_ok());
    }
}
