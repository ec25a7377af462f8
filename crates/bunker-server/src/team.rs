// team.rs — the process-lifetime team table

use bunker_common::bytes::Rgb;
use bunker_common::constants::TeamId;
use bunker_common::packets::TeamData;

#[derive(Debug, Clone)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub color: Rgb,
    pub score: u8,
    pub spectator: bool,
}

impl Team {
    pub fn new(id: TeamId, name: &str, color: Rgb) -> Self {
        Self {
            id,
            name: name.to_string(),
            color,
            score: 0,
            spectator: id == TeamId::Spectator,
        }
    }

    pub fn to_data(&self) -> TeamData {
        TeamData { name: self.name.clone(), color: self.color, score: self.score }
    }
}

/// Both playable teams plus the spectator bench.
#[derive(Debug, Clone)]
pub struct Teams {
    pub team1: Team,
    pub team2: Team,
    pub spectator: Team,
}

impl Teams {
    pub fn new(team1: Team, team2: Team) -> Self {
        Self {
            team1,
            team2,
            spectator: Team::new(TeamId::Spectator, "Spectator", Rgb::new(127, 127, 127)),
        }
    }

    pub fn get(&self, id: TeamId) -> Option<&Team> {
        match id {
            TeamId::Team1 => Some(&self.team1),
            TeamId::Team2 => Some(&self.team2),
            TeamId::Spectator => Some(&self.spectator),
            TeamId::Neutral => None,
        }
    }

    pub fn get_mut(&mut self, id: TeamId) -> Option<&mut Team> {
        match id {
            TeamId::Team1 => Some(&mut self.team1),
            TeamId::Team2 => Some(&mut self.team2),
            TeamId::Spectator => Some(&mut self.spectator),
            TeamId::Neutral => None,
        }
    }

    pub fn playable(&self) -> [&Team; 2] {
        [&self.team1, &self.team2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let teams = Teams::new(
            Team::new(TeamId::Team1, "Blue", Rgb::new(44, 117, 179)),
            Team::new(TeamId::Team2, "Green", Rgb::new(137, 179, 44)),
        );
        assert_eq!(teams.get(TeamId::Team1).unwrap().name, "Blue");
        assert_eq!(teams.get(TeamId::Team2).unwrap().name, "Green");
        assert!(teams.get(TeamId::Spectator).unwrap().spectator);
        assert!(teams.get(TeamId::Neutral).is_none());
    }
}
