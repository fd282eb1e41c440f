//! Offline-Warteschlange fuer Chat-Nachrichten
//!
//! FIFO mit fester Kapazitaet. Ist sie voll, faellt der aelteste Eintrag
//! heraus.

use raumfunk_protocol::messages::ChatRequest;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct OfflineQueue {
    eintraege: VecDeque<ChatRequest>,
    kapazitaet: usize,
}

impl OfflineQueue {
    pub fn neu(kapazitaet: usize) -> Self {
        Self {
            eintraege: VecDeque::new(),
            kapazitaet: kapazitaet.max(1),
        }
    }

    /// Haengt einen Eintrag an. Gibt den verdraengten aeltesten zurueck
    pub fn einreihen(&mut self, post: ChatRequest) -> Option<ChatRequest> {
        self.eintraege.push_back(post);
        self.kuerzen()
    }

    /// Stellt unbestaetigte Posts vor die neueren Offline-Posts
    ///
    /// Die Reihenfolge innerhalb von `posts` bleibt erhalten.
    pub fn vorne_einreihen(&mut self, posts: impl IntoIterator<Item = ChatRequest>) -> usize {
        let posts: Vec<_> = posts.into_iter().collect();
        for post in posts.into_iter().rev() {
            self.eintraege.push_front(post);
        }
        let mut verworfen = 0;
        while self.kuerzen().is_some() {
            verworfen += 1;
        }
        verworfen
    }

    fn kuerzen(&mut self) -> Option<ChatRequest> {
        if self.eintraege.len() > self.kapazitaet {
            return self.eintraege.pop_front();
        }
        None
    }

    /// Entnimmt alle Eintraege in Sendereihenfolge
    pub fn leeren(&mut self) -> Vec<ChatRequest> {
        self.eintraege.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raumfunk_core::types::ZoneId;

    fn post(text: &str) -> ChatRequest {
        ChatRequest {
            zone_id: ZoneId::new("hub"),
            content: text.into(),
            client_msg_id: None,
            reply_to: None,
        }
    }

    fn inhalte(q: &mut OfflineQueue) -> Vec<String> {
        q.leeren().into_iter().map(|p| p.content).collect()
    }

    #[test]
    fn reihenfolge_bleibt_erhalten() {
        let mut q = OfflineQueue::neu(10);
        for t in ["a", "b", "c"] {
            q.einreihen(post(t));
        }
        assert_eq!(inhalte(&mut q), vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn voll_verdraengt_aeltesten() {
        let mut q = OfflineQueue::neu(2);
        assert!(q.einreihen(post("a")).is_none());
        assert!(q.einreihen(post("b")).is_none());
        let weg = q.einreihen(post("c")).unwrap();
        assert_eq!(weg.content, "a");
        assert_eq!(inhalte(&mut q), vec!["b", "c"]);
    }

    #[test]
    fn unbestaetigte_vor_neueren() {
        let mut q = OfflineQueue::neu(10);
        q.einreihen(post("offline-1"));
        q.vorne_einreihen(vec![post("unbestaetigt-1"), post("unbestaetigt-2")]);
        assert_eq!(
            inhalte(&mut q),
            vec!["unbestaetigt-1", "unbestaetigt-2", "offline-1"]
        );
    }

    #[test]
    fn vorne_einreihen_respektiert_kapazitaet() {
        let mut q = OfflineQueue::neu(2);
        q.einreihen(post("neu"));
        let verworfen = q.vorne_einreihen(vec![post("alt-1"), post("alt-2")]);
        assert_eq!(verworfen, 1);
        assert_eq!(inhalte(&mut q), vec!["alt-2", "neu"]);
    }
}
